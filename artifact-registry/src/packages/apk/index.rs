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

//! `APKINDEX.tar.gz` generation.
//!
//! <https://wiki.alpinelinux.org/wiki/Apk_spec#APKINDEX_Format>

use std::fmt::Write as _;
use std::io::Write as _;

use flate2::write::GzEncoder;
use flate2::Compression;
use sha1::{Digest as _, Sha1};

use commons::prelude_errors::*;
use commons::Result;

use super::package::Package;
use super::INDEX_FILENAME;
use crate::artifact::{Artifact as _, FileArtifact};
use crate::crypt;
use crate::packages::distinct;

/// Rebuild the `APKINDEX.tar.gz` of every `(branch, repo, arch)` group.
pub(super) fn index(private_key: &str, packages: &[Package]) -> Result<Vec<FileArtifact>> {
    let mut out = Vec::new();
    for branch in distinct(packages.iter().map(|p| p.branch.as_str())) {
        let branch_pkgs: Vec<&Package> =
            packages.iter().filter(|p| p.branch == branch).collect();
        for repo in distinct(branch_pkgs.iter().map(|p| p.repo.as_str())) {
            let repo_pkgs: Vec<&Package> = branch_pkgs
                .iter()
                .filter(|p| p.repo == repo)
                .cloned()
                .collect();
            for arch in distinct(
                repo_pkgs
                    .iter()
                    .map(|p| p.file_metadata.architecture.as_str()),
            ) {
                let group: Vec<&Package> = repo_pkgs
                    .iter()
                    .filter(|p| p.file_metadata.architecture == arch)
                    .cloned()
                    .collect();
                if let Some(file) = build_packages_index(branch, repo, arch, private_key, &group)
                    .map_err(|e: AnyError| {
                        e.context(format!(
                            "failed to build repository files [{}/{}/{}]",
                            branch, repo, arch
                        ))
                    })?
                {
                    out.push(file);
                }
            }
        }
    }
    Ok(out)
}

fn build_packages_index(
    branch: &str,
    repo: &str,
    arch: &str,
    private_key: &str,
    packages: &[&Package],
) -> Fallible<Option<FileArtifact>> {
    // Delete the package index if there are no packages.
    if packages.is_empty() {
        return Ok(None);
    }

    let mut records = String::new();
    for pkg in packages {
        writeln!(records, "C:{}", pkg.file_metadata.checksum)?;
        writeln!(records, "P:{}", pkg.name)?;
        writeln!(records, "V:{}", pkg.version)?;
        writeln!(records, "A:{}", pkg.file_metadata.architecture)?;
        if !pkg.version_metadata.description.is_empty() {
            writeln!(records, "T:{}", pkg.version_metadata.description)?;
        }
        if !pkg.version_metadata.project_url.is_empty() {
            writeln!(records, "U:{}", pkg.version_metadata.project_url)?;
        }
        if !pkg.version_metadata.license.is_empty() {
            writeln!(records, "L:{}", pkg.version_metadata.license)?;
        }
        writeln!(records, "S:{}", pkg.size())?;
        writeln!(records, "I:{}", pkg.file_metadata.size)?;
        writeln!(records, "o:{}", pkg.file_metadata.origin)?;
        writeln!(records, "m:{}", pkg.version_metadata.maintainer)?;
        writeln!(records, "t:{}", pkg.file_metadata.build_date)?;
        if !pkg.file_metadata.commit_hash.is_empty() {
            writeln!(records, "c:{}", pkg.file_metadata.commit_hash)?;
        }
        if !pkg.file_metadata.dependencies.is_empty() {
            writeln!(records, "D:{}", pkg.file_metadata.dependencies.join(" "))?;
        }
        if !pkg.file_metadata.provides.is_empty() {
            writeln!(records, "p:{}", pkg.file_metadata.provides.join(" "))?;
        }
        writeln!(records)?;
    }

    let mut unsigned = Vec::new();
    write_gzip_tar_stream(&mut unsigned, "APKINDEX", records.as_bytes(), true)?;

    let (_, fingerprint) = crypt::rsa::public_key_and_fingerprint(private_key)?;
    let signature = crypt::rsa::sign_sha1(private_key, &unsigned)?;

    // The signature travels in its own, unterminated gzip tar stream placed
    // before the index stream.
    let mut signed = Vec::new();
    write_gzip_tar_stream(
        &mut signed,
        &format!(".SIGN.RSA.lkar@{}.rsa.pub", hex::encode(&fingerprint)),
        &signature,
        false,
    )?;
    signed.extend_from_slice(&unsigned);

    Ok(Some(FileArtifact::new(
        format!("{}/{}/{}/{}", branch, repo, arch, INDEX_FILENAME),
        signed,
    )))
}

/// Write `content` as a single-entry gzip tar stream; `terminate` controls
/// whether the tar end-of-archive blocks are emitted.
fn write_gzip_tar_stream(
    w: &mut Vec<u8>,
    filename: &str,
    content: &[u8],
    terminate: bool,
) -> Fallible<()> {
    let mut gz = GzEncoder::new(w, Compression::default());

    let mut header = tar::Header::new_ustar();
    header.set_path(filename)?;
    header.set_mode(0o600);
    header.set_size(content.len() as u64);
    header.set_cksum();

    gz.write_all(header.as_bytes())?;
    gz.write_all(content)?;
    let pad = (512 - content.len() % 512) % 512;
    gz.write_all(&vec![0u8; pad])?;
    if terminate {
        gz.write_all(&[0u8; 1024])?;
    }
    gz.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::apk::package::{FileMetadata, VersionMetadata};
    use flate2::bufread::MultiGzDecoder;
    use pretty_assertions::assert_eq;
    use std::io::Read;

    fn package(branch: &str, repo: &str, arch: &str, name: &str, version: &str) -> Package {
        Package {
            name: name.to_string(),
            version: version.to_string(),
            version_metadata: VersionMetadata {
                description: format!("{} description", name),
                license: "MIT".to_string(),
                ..Default::default()
            },
            file_metadata: FileMetadata {
                checksum: "Q1deadbeef".to_string(),
                architecture: arch.to_string(),
                size: 2048,
                build_date: 1700000000,
                ..Default::default()
            },
            size: 4096,
            digest: "ab".repeat(32),
            branch: branch.to_string(),
            repo: repo.to_string(),
            file_path: format!("{}/{}/{}/{}-{}.apk", branch, repo, arch, name, version),
        }
    }

    fn read_index_entries(data: &[u8]) -> Vec<(String, Vec<u8>)> {
        // The signature stream and the index stream decompress into
        // concatenated tar segments; apk reads them as one archive.
        let mut archive = tar::Archive::new(MultiGzDecoder::new(data));
        let mut out = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            out.push((name, content));
        }
        out
    }

    #[test]
    fn empty_package_set_produces_no_files() {
        let (private, _) = crypt::rsa::generate_test_keypair().unwrap();
        assert!(index(&private, &[]).unwrap().is_empty());
    }

    #[test]
    fn builds_signed_index_per_group() {
        let (private, _) = crypt::rsa::generate_test_keypair().unwrap();
        let packages = vec![
            package("v3.19", "main", "x86_64", "jq", "1.7-r0"),
            package("v3.19", "main", "x86_64", "curl", "8.5.0-r0"),
            package("v3.19", "main", "aarch64", "jq", "1.7-r0"),
        ];

        let files = index(&private, &packages).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path()).collect();
        assert_eq!(
            paths,
            vec![
                "v3.19/main/x86_64/APKINDEX.tar.gz",
                "v3.19/main/aarch64/APKINDEX.tar.gz",
            ]
        );

        let entries = read_index_entries(files[0].data());
        assert_eq!(entries.len(), 2);
        let (sig_name, sig) = &entries[0];
        assert!(sig_name.starts_with(".SIGN.RSA.lkar@"));
        assert!(sig_name.ends_with(".rsa.pub"));
        assert!(!sig.is_empty());

        let (index_name, index_content) = &entries[1];
        assert_eq!(index_name, "APKINDEX");
        let text = String::from_utf8(index_content.clone()).unwrap();
        assert!(text.contains("P:jq\n"));
        assert!(text.contains("V:1.7-r0\n"));
        assert!(text.contains("P:curl\n"));
        assert!(text.contains("C:Q1deadbeef\n"));
        assert!(text.contains("S:4096\n"));
        assert!(text.contains("I:2048\n"));
        // Records are blank-line separated.
        assert_eq!(text.matches("\n\n").count(), 2);
    }

    #[test]
    fn index_is_deterministic_for_same_inputs() {
        let (private, _) = crypt::rsa::generate_test_keypair().unwrap();
        let packages = vec![package("v3.19", "main", "x86_64", "jq", "1.7-r0")];
        let a = index(&private, &packages).unwrap();
        let b = index(&private, &packages).unwrap();
        assert_eq!(a[0].data(), b[0].data());
    }
}
