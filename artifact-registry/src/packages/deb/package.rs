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

use std::io::{self, Read, Seek, SeekFrom};

use lazy_static::lazy_static;
use regex::Regex;
use serde_derive::{Deserialize, Serialize};

use commons::buffer::HashedBuffer;

use crate::artifact::Artifact;

const CONTROL_TAR: &str = "control.tar";

lazy_static! {
    // https://www.debian.org/doc/debian-policy/ch-controlfields.html#source
    static ref NAME_PATTERN: Regex = Regex::new(r"\A[a-z0-9][a-z0-9+\-.]+\z").unwrap();
    // https://www.debian.org/doc/debian-policy/ch-controlfields.html#version
    static ref VERSION_PATTERN: Regex =
        Regex::new(r"\A(?:[0-9]+:)?[a-zA-Z0-9.+~]+(?:-[a-zA-Z0-9.+\-~]+)?\z").unwrap();
}

#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("control file is missing")]
    MissingControlFile,
    #[error("unsupported compression algorithm")]
    UnsupportedCompression,
    #[error("package name is invalid")]
    InvalidName,
    #[error("package version is invalid")]
    InvalidVersion,
    #[error("package architecture is invalid")]
    InvalidArchitecture,
    #[error("reading package: {0}")]
    Io(#[from] io::Error),
}

impl From<PackageError> for commons::Error {
    fn from(e: PackageError) -> Self {
        commons::Error::InvalidPackage(e.to_string())
    }
}

/// A Debian package.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub name: String,
    pub version: String,
    pub size: u64,
    pub architecture: String,
    /// The verbatim control stanza, replayed into the `Packages` index.
    pub control: String,
    pub metadata: Metadata,
    pub component: String,
    pub distribution: String,
    pub file_path: String,
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    pub sha512: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub maintainer: String,
    #[serde(default, rename = "projectURL", skip_serializing_if = "String::is_empty")]
    pub project_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl Artifact for Package {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn arch(&self) -> &str {
        &self.architecture
    }

    fn path(&self) -> &str {
        &self.file_path
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn digest(&self) -> oci::Digest {
        oci::Digest::from_encoded(&self.sha256)
    }
}

impl Package {
    /// Parse a Debian package.
    ///
    /// <https://manpages.debian.org/bullseye/dpkg-dev/deb.5.en.html>
    pub fn parse(
        buf: &mut HashedBuffer,
        distribution: &str,
        component: &str,
    ) -> Result<Package, PackageError> {
        let mut pkg = parse_package(&mut *buf)?;
        pkg.component = component.to_string();
        pkg.distribution = distribution.to_string();
        pkg.file_path = format!(
            "pool/{}/{}/{}_{}_{}.deb",
            pkg.distribution, pkg.component, pkg.name, pkg.version, pkg.architecture
        );
        pkg.size = buf.size();
        let sums = buf.sums();
        pkg.md5 = sums.md5_hex();
        pkg.sha1 = sums.sha1_hex();
        pkg.sha256 = sums.sha256_hex();
        pkg.sha512 = sums.sha512_hex();
        buf.seek(SeekFrom::Start(0))?;
        Ok(pkg)
    }
}

fn parse_package<R: Read>(r: R) -> Result<Package, PackageError> {
    let mut archive = ar::Archive::new(r);

    while let Some(entry) = archive.next_entry() {
        let mut entry = entry?;
        let identifier = String::from_utf8_lossy(entry.header().identifier()).into_owned();
        if !identifier.starts_with(CONTROL_TAR) {
            continue;
        }
        // The member name may carry a trailing slash (since dpkg 1.15.6).
        let suffix = identifier[CONTROL_TAR.len()..].trim_end_matches('/');
        let inner: Box<dyn Read + '_> = match suffix {
            "" => Box::new(&mut entry),
            ".gz" => Box::new(flate2::read::GzDecoder::new(&mut entry)),
            ".xz" => Box::new(xz2::read::XzDecoder::new(&mut entry)),
            ".zst" => Box::new(
                zstd::stream::read::Decoder::new(&mut entry)
                    .map_err(PackageError::Io)?,
            ),
            _ => return Err(PackageError::UnsupportedCompression),
        };

        let mut tar = tar::Archive::new(inner);
        for tar_entry in tar.entries()? {
            let mut tar_entry = tar_entry?;
            if tar_entry.header().entry_type() != tar::EntryType::Regular {
                continue;
            }
            let is_control = tar_entry
                .path()
                .ok()
                .and_then(|p| p.file_name().map(|n| n == "control"))
                .unwrap_or(false);
            if is_control {
                let mut content = String::new();
                tar_entry.read_to_string(&mut content)?;
                return parse_control_file(&content);
            }
        }
    }

    Err(PackageError::MissingControlFile)
}

/// Parse a Debian control file to retrieve the package metadata.
pub fn parse_control_file(content: &str) -> Result<Package, PackageError> {
    let mut pkg = Package::default();
    let mut depends = String::new();
    let mut key = String::new();

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            // Continuation line of the previous field.
            match key.as_str() {
                "Description" => pkg.metadata.description.push_str(line),
                "Depends" => depends.push_str(trimmed),
                _ => {}
            }
            continue;
        }

        let (k, value) = match trimmed.split_once(':') {
            Some((k, v)) => (k, v.trim()),
            None => continue,
        };
        key = k.to_string();
        match k {
            "Package" => pkg.name = value.to_string(),
            "Version" => pkg.version = value.to_string(),
            "Architecture" => pkg.architecture = value.to_string(),
            "Maintainer" => pkg.metadata.maintainer = mailbox_name(value),
            "Description" => pkg.metadata.description = value.to_string(),
            "Depends" => depends.push_str(value),
            "Homepage" => {
                if url::Url::parse(value).is_ok() {
                    pkg.metadata.project_url = value.to_string();
                }
            }
            _ => {}
        }
    }

    if !NAME_PATTERN.is_match(&pkg.name) {
        return Err(PackageError::InvalidName);
    }
    if !VERSION_PATTERN.is_match(&pkg.version) {
        return Err(PackageError::InvalidVersion);
    }
    if pkg.architecture.is_empty() {
        return Err(PackageError::InvalidArchitecture);
    }

    pkg.metadata.dependencies = depends
        .split(',')
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .collect();
    pkg.control = content.trim().to_string();

    Ok(pkg)
}

/// The display name of an RFC 5322 mailbox, or the raw value.
fn mailbox_name(value: &str) -> String {
    match value.split_once('<') {
        Some((name, rest)) if rest.contains('>') && !name.trim().is_empty() => {
            name.trim().to_string()
        }
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const CONTROL: &str = "Package: tool\n\
                           Version: 1.0\n\
                           Architecture: amd64\n\
                           Maintainer: A Maintainer <a@example.com>\n\
                           Installed-Size: 10\n\
                           Depends: libc6 (>= 2.34),\n libssl3 (>= 3.0.0)\n\
                           Homepage: https://example.com/tool\n\
                           Description: A tool\n that does things\n";

    fn control_tar() -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_ustar();
        header.set_size(CONTROL.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "./control", CONTROL.as_bytes())
            .unwrap();
        builder.into_inner().unwrap()
    }

    fn deb(control_member: &str, control_data: &[u8]) -> Vec<u8> {
        let mut builder = ar::Builder::new(Vec::new());
        let header = ar::Header::new(b"debian-binary".to_vec(), 4);
        builder.append(&header, &b"2.0\n"[..]).unwrap();
        let header = ar::Header::new(
            control_member.as_bytes().to_vec(),
            control_data.len() as u64,
        );
        builder.append(&header, control_data).unwrap();
        builder.into_inner().unwrap()
    }

    #[test]
    fn parses_gzip_control() {
        let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        gz.write_all(&control_tar()).unwrap();
        let data = deb("control.tar.gz", &gz.finish().unwrap());
        let mut buf = HashedBuffer::from_reader(&data[..]).unwrap();

        let pkg = Package::parse(&mut buf, "stable", "main").unwrap();
        assert_eq!(pkg.name, "tool");
        assert_eq!(pkg.version, "1.0");
        assert_eq!(pkg.architecture, "amd64");
        assert_eq!(pkg.metadata.maintainer, "A Maintainer");
        assert_eq!(pkg.metadata.project_url, "https://example.com/tool");
        assert_eq!(
            pkg.metadata.dependencies,
            vec!["libc6 (>= 2.34)", "libssl3 (>= 3.0.0)"]
        );
        assert_eq!(pkg.file_path, "pool/stable/main/tool_1.0_amd64.deb");
        assert_eq!(pkg.size, data.len() as u64);
        assert!(pkg.control.starts_with("Package: tool"));

        let sums = buf.sums();
        assert_eq!(pkg.md5, sums.md5_hex());
        assert_eq!(pkg.sha512, sums.sha512_hex());
    }

    #[test]
    fn parses_xz_and_plain_control() {
        let mut xz = xz2::write::XzEncoder::new(Vec::new(), 6);
        xz.write_all(&control_tar()).unwrap();
        let data = deb("control.tar.xz", &xz.finish().unwrap());
        let mut buf = HashedBuffer::from_reader(&data[..]).unwrap();
        assert_eq!(Package::parse(&mut buf, "d", "c").unwrap().name, "tool");

        let data = deb("control.tar", &control_tar());
        let mut buf = HashedBuffer::from_reader(&data[..]).unwrap();
        assert_eq!(Package::parse(&mut buf, "d", "c").unwrap().name, "tool");
    }

    #[test]
    fn parses_zstd_control() {
        let compressed = zstd::stream::encode_all(&control_tar()[..], 0).unwrap();
        let data = deb("control.tar.zst", &compressed);
        let mut buf = HashedBuffer::from_reader(&data[..]).unwrap();
        assert_eq!(Package::parse(&mut buf, "d", "c").unwrap().name, "tool");
    }

    #[test]
    fn rejects_unknown_compression() {
        let data = deb("control.tar.lz4", b"whatever");
        let mut buf = HashedBuffer::from_reader(&data[..]).unwrap();
        assert!(matches!(
            Package::parse(&mut buf, "d", "c"),
            Err(PackageError::UnsupportedCompression)
        ));
    }

    #[test]
    fn rejects_missing_control() {
        let data = deb("data.tar.gz", b"whatever");
        let mut buf = HashedBuffer::from_reader(&data[..]).unwrap();
        assert!(matches!(
            Package::parse(&mut buf, "d", "c"),
            Err(PackageError::MissingControlFile)
        ));
    }

    #[test]
    fn validates_name_version_arch() {
        let invalid_name = "Package: UPPER\nVersion: 1.0\nArchitecture: amd64\n";
        assert!(matches!(
            parse_control_file(invalid_name),
            Err(PackageError::InvalidName)
        ));

        let invalid_version = "Package: tool\nVersion: not version!\nArchitecture: amd64\n";
        assert!(matches!(
            parse_control_file(invalid_version),
            Err(PackageError::InvalidVersion)
        ));

        let missing_arch = "Package: tool\nVersion: 1.0\n";
        assert!(matches!(
            parse_control_file(missing_arch),
            Err(PackageError::InvalidArchitecture)
        ));

        let epoch = "Package: tool\nVersion: 1:2.0-1\nArchitecture: amd64\n";
        assert_eq!(parse_control_file(epoch).unwrap().version, "1:2.0-1");
    }

    #[test]
    fn mailbox_name_fallback() {
        assert_eq!(mailbox_name("Jane Doe <jane@example.com>"), "Jane Doe");
        assert_eq!(mailbox_name("jane@example.com"), "jane@example.com");
        assert_eq!(mailbox_name("<jane@example.com>"), "<jane@example.com>");
    }
}
