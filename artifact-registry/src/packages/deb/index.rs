// Copyright 2024 Artifact Registry Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! `Packages`, `Release` and `InRelease` generation.
//!
//! <https://wiki.debian.org/DebianRepository/Format#A.22Packages.22_Indices>

use std::fmt::Write as _;
use std::io::Write as _;

use flate2::write::GzEncoder;
use flate2::Compression;

use commons::buffer::HashedBuffer;
use commons::prelude_errors::*;
use commons::Result;

use super::package::Package;
use crate::artifact::{Artifact as _, FileArtifact};
use crate::crypt;
use crate::packages::distinct;

/// Rebuild all repository files for every available distribution, component
/// and architecture.
pub(super) fn index(private_key: &str, packages: &[Package]) -> Result<Vec<FileArtifact>> {
    let mut out = Vec::new();
    for distribution in distinct(packages.iter().map(|p| p.distribution.as_str())) {
        let dist_pkgs: Vec<&Package> = packages
            .iter()
            .filter(|p| p.distribution == distribution)
            .collect();
        let mut components: Vec<String> = distinct(dist_pkgs.iter().map(|p| p.component.as_str()))
            .into_iter()
            .map(String::from)
            .collect();
        let mut architectures: Vec<String> =
            distinct(dist_pkgs.iter().map(|p| p.architecture.as_str()))
                .into_iter()
                .map(String::from)
                .collect();

        let mut indices = Vec::new();
        for component in &components {
            for architecture in &architectures {
                let group: Vec<&Package> = dist_pkgs
                    .iter()
                    .filter(|p| &p.component == component && &p.architecture == architecture)
                    .cloned()
                    .collect();
                indices.extend(build_packages_indices(
                    distribution,
                    component,
                    architecture,
                    &group,
                )?);
            }
        }

        components.sort();
        architectures.sort();
        let release = build_release_files(
            distribution,
            &components,
            &architectures,
            private_key,
            &indices,
        )?;
        out.extend(indices);
        out.extend(release);
    }
    Ok(out)
}

/// The `Packages`, `Packages.gz` and `Packages.xz` files of one
/// `(distribution, component, architecture)` group.
fn build_packages_indices(
    distribution: &str,
    component: &str,
    architecture: &str,
    packages: &[&Package],
) -> Fallible<Vec<FileArtifact>> {
    // Delete the package indices if there are no packages.
    if packages.is_empty() {
        return Ok(Vec::new());
    }

    let mut content = String::new();
    for (i, pkg) in packages.iter().enumerate() {
        if i > 0 {
            content.push('\n');
        }
        writeln!(content, "{}", pkg.control.trim())?;
        writeln!(content, "Filename: {}", pkg.path())?;
        writeln!(content, "Size: {}", pkg.size)?;
        writeln!(content, "MD5sum: {}", pkg.md5)?;
        writeln!(content, "SHA1: {}", pkg.sha1)?;
        writeln!(content, "SHA256: {}", pkg.sha256)?;
        writeln!(content, "SHA512: {}", pkg.sha512)?;
    }

    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(content.as_bytes())?;
    let gz = gz.finish()?;

    let mut xz = xz2::write::XzEncoder::new(Vec::new(), 6);
    xz.write_all(content.as_bytes())?;
    let xz = xz.finish()?;

    let base = format!(
        "dists/{}/{}/binary-{}",
        distribution, component, architecture
    );
    Ok(vec![
        FileArtifact::new(format!("{}/Packages", base), content.into_bytes()),
        FileArtifact::new(format!("{}/Packages.gz", base), gz),
        FileArtifact::new(format!("{}/Packages.xz", base), xz),
    ])
}

/// The signed `Release`, `Release.gpg` and `InRelease` files of one
/// distribution.
///
/// <https://wiki.debian.org/DebianRepository/Format#A.22Release.22_files>
fn build_release_files(
    distribution: &str,
    components: &[String],
    architectures: &[String],
    private_key: &str,
    files: &[FileArtifact],
) -> Fallible<Vec<FileArtifact>> {
    // Delete the release files if there are no packages.
    if files.is_empty() {
        return Ok(Vec::new());
    }

    let mut release = String::new();
    writeln!(release, "Origin: Artifact Registry")?;
    writeln!(release, "Label: Artifact Registry")?;
    writeln!(release, "Suite: {}", distribution)?;
    writeln!(release, "Codename: {}", distribution)?;
    writeln!(release, "Components: {}", components.join(" "))?;
    writeln!(release, "Architectures: {}", architectures.join(" "))?;
    writeln!(
        release,
        "Date: {}",
        chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S UTC")
    )?;

    let mut md5 = String::new();
    let mut sha1 = String::new();
    let mut sha256 = String::new();
    let mut sha512 = String::new();
    let prefix = format!("dists/{}/", distribution);
    for file in files {
        let sums = HashedBuffer::from_reader(file.data())?.sums();
        let path = file
            .path()
            .strip_prefix(&prefix)
            .unwrap_or_else(|| file.path());
        let size = file.size();
        writeln!(md5, " {} {} {}", sums.md5_hex(), size, path)?;
        writeln!(sha1, " {} {} {}", sums.sha1_hex(), size, path)?;
        writeln!(sha256, " {} {} {}", sums.sha256_hex(), size, path)?;
        writeln!(sha512, " {} {} {}", sums.sha512_hex(), size, path)?;
    }
    writeln!(release, "MD5Sum:")?;
    release.push_str(&md5);
    writeln!(release, "SHA1:")?;
    release.push_str(&sha1);
    writeln!(release, "SHA256:")?;
    release.push_str(&sha256);
    writeln!(release, "SHA512:")?;
    release.push_str(&sha512);

    let release_gpg = crypt::openpgp::armored_detach_sign(private_key, release.as_bytes())?;
    let in_release = crypt::openpgp::clearsign(private_key, release.as_bytes())?;

    Ok(vec![
        FileArtifact::new(
            format!("dists/{}/Release", distribution),
            release.into_bytes(),
        ),
        FileArtifact::new(format!("dists/{}/Release.gpg", distribution), release_gpg),
        FileArtifact::new(format!("dists/{}/InRelease", distribution), in_release),
    ])
}
