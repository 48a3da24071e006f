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

use std::io::{self, BufRead, Read, Seek, SeekFrom};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::bufread::GzDecoder;
use serde_derive::{Deserialize, Serialize};
use sha1::{Digest as _, Sha1};

use commons::buffer::HashedBuffer;

use crate::artifact::Artifact;

#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("PKGINFO file is missing")]
    MissingPkgInfo,
    #[error("package name is invalid")]
    InvalidName,
    #[error("package version is invalid")]
    InvalidVersion,
    #[error("reading package: {0}")]
    Io(#[from] io::Error),
}

impl From<PackageError> for commons::Error {
    fn from(e: PackageError) -> Self {
        commons::Error::InvalidPackage(e.to_string())
    }
}

/// An Alpine package.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub name: String,
    pub version: String,
    pub version_metadata: VersionMetadata,
    pub file_metadata: FileMetadata,
    pub size: u64,
    /// Hex-encoded SHA-256 of the `.apk` file.
    pub digest: String,
    pub branch: String,
    pub repo: String,
    pub file_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionMetadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub maintainer: String,
    #[serde(default, rename = "projectURL", skip_serializing_if = "String::is_empty")]
    pub project_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub license: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    /// The legacy `Q1<base64 sha1>` checksum apk clients verify.
    pub checksum: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub packager: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub build_date: i64,
    /// Installed size in bytes.
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub size: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub architecture: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub origin: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub commit_hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub install_if: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provides: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

impl Artifact for Package {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn arch(&self) -> &str {
        &self.file_metadata.architecture
    }

    fn path(&self) -> &str {
        &self.file_path
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn digest(&self) -> oci::Digest {
        oci::Digest::from_encoded(&self.digest)
    }
}

impl Package {
    /// Parse an Alpine package.
    ///
    /// Alpine packages are concatenated gzip streams; the stream holding
    /// `.PKGINFO` is the control segment, and its compressed bytes are what
    /// the `Q1` checksum covers. The buffer is rewound afterwards so the
    /// blob upload re-reads the exact bytes received.
    pub fn parse(
        buf: &mut HashedBuffer,
        branch: &str,
        repository: &str,
    ) -> Result<Package, PackageError> {
        let mut r = TeeByteReader::new(&mut *buf);

        loop {
            if r.fill_buf()?.is_empty() {
                break;
            }
            r.reset_hash();

            let mut gz = GzDecoder::new(&mut r);
            let mut found = None;
            {
                let mut archive = tar::Archive::new(&mut gz);
                let mut entries = archive.entries()?;
                while let Some(entry) = entries.next() {
                    // apk tar segments are not terminated, so the reader may
                    // stumble at the segment end; stop there.
                    let mut entry = match entry {
                        Ok(entry) => entry,
                        Err(_) => break,
                    };
                    let is_pkginfo = entry
                        .path()
                        .map(|p| p.to_str() == Some(".PKGINFO"))
                        .unwrap_or(false);
                    if is_pkginfo {
                        let mut content = String::new();
                        entry.read_to_string(&mut content)?;
                        found = Some(parse_package_info(&content, branch, repository)?);
                        break;
                    }
                }
            }
            // Drain the member so the checksum covers the whole stream.
            io::copy(&mut gz, &mut io::sink())?;
            drop(gz);

            if let Some(mut pkg) = found {
                pkg.file_metadata.checksum = format!("Q1{}", BASE64.encode(r.sum()));
                let sums = buf.sums();
                pkg.digest = sums.sha256_hex();
                pkg.size = buf.size();
                pkg.file_path = format!(
                    "{}/{}/{}/{}-{}.apk",
                    pkg.branch, pkg.repo, pkg.file_metadata.architecture, pkg.name, pkg.version
                );
                buf.seek(SeekFrom::Start(0))?;
                return Ok(pkg);
            }
        }

        Err(PackageError::MissingPkgInfo)
    }
}

/// Parse a PKGINFO file into package metadata.
fn parse_package_info(
    content: &str,
    branch: &str,
    repository: &str,
) -> Result<Package, PackageError> {
    let mut pkg = Package {
        branch: branch.to_string(),
        repo: repository.to_string(),
        ..Default::default()
    };

    for line in content.lines() {
        if line.starts_with('#') {
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => continue,
        };
        match key {
            "pkgname" => pkg.name = value.to_string(),
            "pkgver" => pkg.version = value.to_string(),
            "pkgdesc" => pkg.version_metadata.description = value.to_string(),
            "url" => pkg.version_metadata.project_url = value.to_string(),
            "builddate" => {
                if let Ok(n) = value.parse() {
                    pkg.file_metadata.build_date = n;
                }
            }
            "size" => {
                if let Ok(n) = value.parse() {
                    pkg.file_metadata.size = n;
                }
            }
            "arch" => pkg.file_metadata.architecture = value.to_string(),
            "origin" => pkg.file_metadata.origin = value.to_string(),
            "commit" => pkg.file_metadata.commit_hash = value.to_string(),
            "maintainer" => pkg.version_metadata.maintainer = value.to_string(),
            "packager" => pkg.file_metadata.packager = value.to_string(),
            "license" => pkg.version_metadata.license = value.to_string(),
            "install_if" => pkg.file_metadata.install_if = value.to_string(),
            "provides" if !value.is_empty() => {
                pkg.file_metadata.provides.push(value.to_string())
            }
            "depend" if !value.is_empty() => {
                pkg.file_metadata.dependencies.push(value.to_string())
            }
            _ => {}
        }
    }

    if pkg.name.is_empty() {
        return Err(PackageError::InvalidName);
    }
    if pkg.version.is_empty() {
        return Err(PackageError::InvalidVersion);
    }
    if url::Url::parse(&pkg.version_metadata.project_url).is_err() {
        pkg.version_metadata.project_url = String::new();
    }

    Ok(pkg)
}

/// Buffered reader that hashes exactly the bytes its consumer used, so the
/// gzip decoder never reads past a member boundary unaccounted.
struct TeeByteReader<R: Read> {
    inner: R,
    buf: Vec<u8>,
    pos: usize,
    cap: usize,
    hash: Sha1,
}

impl<R: Read> TeeByteReader<R> {
    fn new(inner: R) -> Self {
        TeeByteReader {
            inner,
            buf: vec![0u8; 8 * 1024],
            pos: 0,
            cap: 0,
            hash: Sha1::new(),
        }
    }

    fn reset_hash(&mut self) {
        self.hash = Sha1::new();
    }

    fn sum(&self) -> Vec<u8> {
        self.hash.clone().finalize().to_vec()
    }
}

impl<R: Read> Read for TeeByteReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl<R: Read> BufRead for TeeByteReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.pos == self.cap {
            self.cap = self.inner.read(&mut self.buf)?;
            self.pos = 0;
        }
        Ok(&self.buf[self.pos..self.cap])
    }

    fn consume(&mut self, amt: usize) {
        let end = (self.pos + amt).min(self.cap);
        self.hash.update(&self.buf[self.pos..end]);
        self.pos = end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const PKGINFO: &str = "# Generated by abuild\n\
                           pkgname = jq\n\
                           pkgver = 1.7-r0\n\
                           pkgdesc = Command-line JSON processor\n\
                           url = https://jqlang.github.io/jq/\n\
                           arch = x86_64\n\
                           size = 1024\n\
                           builddate = 1700000000\n\
                           license = MIT\n\
                           origin = jq\n\
                           maintainer = A Maintainer <a@example.com>\n\
                           depend = musl\n\
                           depend = libc\n\
                           provides = cmd:jq\n";

    fn gzip_tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in entries {
            let mut header = tar::Header::new_ustar();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn parses_single_stream_package() {
        let stream = gzip_tar(&[(".PKGINFO", PKGINFO.as_bytes())]);
        let mut buf = HashedBuffer::from_reader(&stream[..]).unwrap();

        let pkg = Package::parse(&mut buf, "v3.19", "main").unwrap();
        assert_eq!(pkg.name, "jq");
        assert_eq!(pkg.version, "1.7-r0");
        assert_eq!(pkg.file_metadata.architecture, "x86_64");
        assert_eq!(pkg.file_path, "v3.19/main/x86_64/jq-1.7-r0.apk");
        assert_eq!(pkg.size, stream.len() as u64);
        assert_eq!(pkg.version_metadata.license, "MIT");
        assert_eq!(pkg.file_metadata.dependencies, vec!["musl", "libc"]);
        assert_eq!(pkg.file_metadata.provides, vec!["cmd:jq"]);
        assert_eq!(pkg.file_metadata.size, 1024);

        // Q1 checksum is the SHA-1 of the control stream's compressed bytes.
        let expected = format!("Q1{}", BASE64.encode(Sha1::digest(&stream)));
        assert_eq!(pkg.file_metadata.checksum, expected);

        // Digest covers the whole file, and the buffer is rewound.
        assert_eq!(pkg.digest, buf.sums().sha256_hex());
        let mut rest = Vec::new();
        buf.read_to_end(&mut rest).unwrap();
        assert_eq!(rest.len(), stream.len());
    }

    #[test]
    fn finds_pkginfo_in_later_stream() {
        let first = gzip_tar(&[("signature", b"sig-bytes")]);
        let second = gzip_tar(&[(".PKGINFO", PKGINFO.as_bytes())]);
        let mut data = first.clone();
        data.extend_from_slice(&second);
        let mut buf = HashedBuffer::from_reader(&data[..]).unwrap();

        let pkg = Package::parse(&mut buf, "v3.19", "main").unwrap();
        assert_eq!(pkg.name, "jq");
        // The checksum covers only the stream holding .PKGINFO.
        let expected = format!("Q1{}", BASE64.encode(Sha1::digest(&second)));
        assert_eq!(pkg.file_metadata.checksum, expected);
        assert_eq!(pkg.size, data.len() as u64);
    }

    #[test]
    fn rejects_missing_pkginfo() {
        let stream = gzip_tar(&[("other-file", b"content")]);
        let mut buf = HashedBuffer::from_reader(&stream[..]).unwrap();
        match Package::parse(&mut buf, "v3.19", "main") {
            Err(PackageError::MissingPkgInfo) => {}
            other => panic!("unexpected result: {:?}", other.map(|p| p.name)),
        }
    }

    #[test]
    fn rejects_missing_name_or_version() {
        let no_name = "pkgver = 1.0\narch = x86_64\n";
        let stream = gzip_tar(&[(".PKGINFO", no_name.as_bytes())]);
        let mut buf = HashedBuffer::from_reader(&stream[..]).unwrap();
        assert!(matches!(
            Package::parse(&mut buf, "b", "r"),
            Err(PackageError::InvalidName)
        ));

        let no_version = "pkgname = jq\narch = x86_64\n";
        let stream = gzip_tar(&[(".PKGINFO", no_version.as_bytes())]);
        let mut buf = HashedBuffer::from_reader(&stream[..]).unwrap();
        assert!(matches!(
            Package::parse(&mut buf, "b", "r"),
            Err(PackageError::InvalidVersion)
        ));
    }

    #[test]
    fn drops_invalid_project_url() {
        let info = "pkgname = jq\npkgver = 1.0\nurl = not a url\n";
        let pkg = parse_package_info(info, "b", "r").unwrap();
        assert_eq!(pkg.version_metadata.project_url, "");
    }

    #[test]
    fn metadata_json_round_trips() {
        let stream = gzip_tar(&[(".PKGINFO", PKGINFO.as_bytes())]);
        let mut buf = HashedBuffer::from_reader(&stream[..]).unwrap();
        let pkg = Package::parse(&mut buf, "v3.19", "main").unwrap();

        let json = serde_json::to_string(&pkg).unwrap();
        assert!(json.contains("\"filePath\":\"v3.19/main/x86_64/jq-1.7-r0.apk\""));
        let back: Package = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pkg);
    }
}
