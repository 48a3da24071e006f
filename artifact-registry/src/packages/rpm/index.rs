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

//! `repodata` generation: `primary`, `filelists`, `other` and `repomd.xml`.
//!
//! <https://docs.pulpproject.org/en/2.19/plugins/pulp_rpm/tech-reference/rpm.html>

use std::io::Write as _;

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use serde_derive::Serialize;
use sha2::{Digest as _, Sha256};

use commons::prelude_errors::*;
use commons::Result;

use super::package::{Changelog, Entry, FileEntry, Package};
use crate::artifact::FileArtifact;
use crate::crypt;

const XML_HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";
const XMLNS_COMMON: &str = "http://linux.duke.edu/metadata/common";
const XMLNS_RPM: &str = "http://linux.duke.edu/metadata/rpm";
const XMLNS_REPO: &str = "http://linux.duke.edu/metadata/repo";
const XMLNS_OTHER: &str = "http://linux.duke.edu/metadata/other";

/// Rebuild the repository metadata for the given package set.
pub(super) fn index(private_key: &str, packages: &[Package]) -> Result<Vec<FileArtifact>> {
    let (primary, primary_file) = build_primary(packages)?;
    let (filelists, filelists_file) = build_filelists(packages)?;
    let (other, other_file) = build_other(packages)?;
    let mut out = build_repomd(private_key, &[primary, filelists, other])?;
    out.push(primary_file);
    out.push(filelists_file);
    out.push(other_file);
    Ok(out)
}

#[derive(Debug, Serialize)]
struct RepoChecksum {
    #[serde(rename = "@type")]
    kind: &'static str,
    #[serde(rename = "$text")]
    value: String,
}

#[derive(Debug, Serialize)]
struct RepoLocation {
    #[serde(rename = "@href")]
    href: String,
}

#[derive(Debug, Serialize)]
struct RepoData {
    #[serde(rename = "@type")]
    kind: &'static str,
    checksum: RepoChecksum,
    #[serde(rename = "open-checksum")]
    open_checksum: RepoChecksum,
    location: RepoLocation,
    timestamp: i64,
    size: u64,
    #[serde(rename = "open-size")]
    open_size: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename = "repomd")]
struct Repomd<'a> {
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    #[serde(rename = "@xmlns:rpm")]
    xmlns_rpm: &'static str,
    data: &'a [RepoData],
}

fn build_repomd(private_key: &str, data: &[RepoData]) -> Fallible<Vec<FileArtifact>> {
    let body = to_xml(&Repomd {
        xmlns: XMLNS_REPO,
        xmlns_rpm: XMLNS_RPM,
        data,
    })?;
    let content = format!("{}{}", XML_HEADER, body);
    let signature = crypt::openpgp::armored_detach_sign(private_key, content.as_bytes())?;
    Ok(vec![
        FileArtifact::new("repomd.xml", content.into_bytes()),
        FileArtifact::new("repomd.xml.asc", signature),
    ])
}

#[derive(Debug, Serialize)]
struct XmlVersion {
    #[serde(rename = "@epoch")]
    epoch: String,
    #[serde(rename = "@ver")]
    version: String,
    #[serde(rename = "@rel")]
    release: String,
}

impl XmlVersion {
    fn of(pkg: &Package) -> Self {
        XmlVersion {
            epoch: pkg.file_metadata.epoch.clone(),
            version: pkg.file_metadata.version.clone(),
            release: pkg.file_metadata.release.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct XmlEntry {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@flags", skip_serializing_if = "String::is_empty")]
    flags: String,
    #[serde(rename = "@ver", skip_serializing_if = "String::is_empty")]
    version: String,
    #[serde(rename = "@epoch", skip_serializing_if = "String::is_empty")]
    epoch: String,
    #[serde(rename = "@rel", skip_serializing_if = "String::is_empty")]
    release: String,
}

impl XmlEntry {
    fn of(entry: &Entry) -> Self {
        XmlEntry {
            name: entry.name.clone(),
            flags: entry.flags.clone(),
            version: entry.version.clone(),
            epoch: entry.epoch.clone(),
            release: entry.release.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct XmlEntryList {
    #[serde(rename = "rpm:entry")]
    entries: Vec<XmlEntry>,
}

impl XmlEntryList {
    fn of(entries: &[Entry]) -> Self {
        XmlEntryList {
            entries: entries.iter().map(XmlEntry::of).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct XmlFile {
    #[serde(rename = "@type", skip_serializing_if = "String::is_empty")]
    kind: String,
    #[serde(rename = "$text")]
    path: String,
}

impl XmlFile {
    fn of(file: &FileEntry) -> Self {
        XmlFile {
            kind: file.kind.clone(),
            path: file.path.clone(),
        }
    }
}

fn build_primary(packages: &[Package]) -> Fallible<(RepoData, FileArtifact)> {
    #[derive(Debug, Serialize)]
    struct Checksum {
        #[serde(rename = "@type")]
        kind: &'static str,
        #[serde(rename = "@pkgid")]
        pkgid: &'static str,
        #[serde(rename = "$text")]
        value: String,
    }

    #[derive(Debug, Serialize)]
    struct Times {
        #[serde(rename = "@file")]
        file: u64,
        #[serde(rename = "@build")]
        build: u64,
    }

    #[derive(Debug, Serialize)]
    struct Sizes {
        #[serde(rename = "@package")]
        package: u64,
        #[serde(rename = "@installed")]
        installed: u64,
        #[serde(rename = "@archive")]
        archive: u64,
    }

    #[derive(Debug, Serialize)]
    struct Location {
        #[serde(rename = "@href")]
        href: String,
    }

    #[derive(Debug, Serialize)]
    struct Format {
        #[serde(rename = "rpm:license")]
        license: String,
        #[serde(rename = "rpm:vendor")]
        vendor: String,
        #[serde(rename = "rpm:group")]
        group: String,
        #[serde(rename = "rpm:buildhost")]
        buildhost: String,
        #[serde(rename = "rpm:sourcerpm")]
        sourcerpm: String,
        #[serde(rename = "rpm:provides")]
        provides: XmlEntryList,
        #[serde(rename = "rpm:requires")]
        requires: XmlEntryList,
        #[serde(rename = "rpm:conflicts")]
        conflicts: XmlEntryList,
        #[serde(rename = "rpm:obsoletes")]
        obsoletes: XmlEntryList,
        file: Vec<XmlFile>,
    }

    #[derive(Debug, Serialize)]
    struct XmlPackage {
        #[serde(rename = "@type")]
        kind: &'static str,
        name: String,
        arch: String,
        version: XmlVersion,
        checksum: Checksum,
        summary: String,
        description: String,
        packager: String,
        url: String,
        time: Times,
        size: Sizes,
        location: Location,
        format: Format,
    }

    #[derive(Debug, Serialize)]
    #[serde(rename = "metadata")]
    struct Metadata {
        #[serde(rename = "@xmlns")]
        xmlns: &'static str,
        #[serde(rename = "@xmlns:rpm")]
        xmlns_rpm: &'static str,
        #[serde(rename = "@packages")]
        package_count: usize,
        package: Vec<XmlPackage>,
    }

    let pkgs: Vec<XmlPackage> = packages
        .iter()
        .map(|pkg| {
            // Only executables make it into primary; the full list lives in
            // filelists.
            let files = pkg
                .file_metadata
                .files
                .iter()
                .filter(|f| f.is_executable)
                .map(XmlFile::of)
                .collect();
            XmlPackage {
                kind: "rpm",
                name: pkg.name.clone(),
                arch: pkg.file_metadata.architecture.clone(),
                version: XmlVersion::of(pkg),
                checksum: Checksum {
                    kind: "sha256",
                    pkgid: "YES",
                    value: pkg.hash_sha256.clone(),
                },
                summary: pkg.version_metadata.summary.clone(),
                description: pkg.version_metadata.description.clone(),
                packager: pkg.file_metadata.packager.clone(),
                url: pkg.version_metadata.project_url.clone(),
                time: Times {
                    file: pkg.file_metadata.file_time,
                    build: pkg.file_metadata.build_time,
                },
                size: Sizes {
                    package: pkg.size,
                    installed: pkg.file_metadata.installed_size,
                    archive: pkg.file_metadata.archive_size,
                },
                location: Location {
                    href: pkg.file_path.clone(),
                },
                format: Format {
                    license: pkg.version_metadata.license.clone(),
                    vendor: pkg.file_metadata.vendor.clone(),
                    group: pkg.file_metadata.group.clone(),
                    buildhost: pkg.file_metadata.build_host.clone(),
                    sourcerpm: pkg.file_metadata.source_rpm.clone(),
                    provides: XmlEntryList::of(&pkg.file_metadata.provides),
                    requires: XmlEntryList::of(&pkg.file_metadata.requires),
                    conflicts: XmlEntryList::of(&pkg.file_metadata.conflicts),
                    obsoletes: XmlEntryList::of(&pkg.file_metadata.obsoletes),
                    files,
                },
            }
        })
        .collect();

    new_repo_data(
        "primary",
        &Metadata {
            xmlns: XMLNS_COMMON,
            xmlns_rpm: XMLNS_RPM,
            package_count: pkgs.len(),
            package: pkgs,
        },
    )
}

fn build_filelists(packages: &[Package]) -> Fallible<(RepoData, FileArtifact)> {
    #[derive(Debug, Serialize)]
    struct XmlPackage {
        #[serde(rename = "@pkgid")]
        pkgid: String,
        #[serde(rename = "@name")]
        name: String,
        #[serde(rename = "@arch")]
        arch: String,
        version: XmlVersion,
        file: Vec<XmlFile>,
    }

    #[derive(Debug, Serialize)]
    #[serde(rename = "filelists")]
    struct Filelists {
        #[serde(rename = "@xmlns")]
        xmlns: &'static str,
        #[serde(rename = "@packages")]
        package_count: usize,
        package: Vec<XmlPackage>,
    }

    let pkgs: Vec<XmlPackage> = packages
        .iter()
        .map(|pkg| XmlPackage {
            pkgid: pkg.hash_sha256.clone(),
            name: pkg.name.clone(),
            arch: pkg.file_metadata.architecture.clone(),
            version: XmlVersion::of(pkg),
            file: pkg.file_metadata.files.iter().map(XmlFile::of).collect(),
        })
        .collect();

    new_repo_data(
        "filelists",
        &Filelists {
            xmlns: XMLNS_OTHER,
            package_count: pkgs.len(),
            package: pkgs,
        },
    )
}

fn build_other(packages: &[Package]) -> Fallible<(RepoData, FileArtifact)> {
    #[derive(Debug, Serialize)]
    struct XmlChangelog {
        #[serde(rename = "@author")]
        author: String,
        #[serde(rename = "@date")]
        date: i64,
        #[serde(rename = "$text")]
        text: String,
    }

    #[derive(Debug, Serialize)]
    struct XmlPackage {
        #[serde(rename = "@pkgid")]
        pkgid: String,
        #[serde(rename = "@name")]
        name: String,
        #[serde(rename = "@arch")]
        arch: String,
        version: XmlVersion,
        changelog: Vec<XmlChangelog>,
    }

    #[derive(Debug, Serialize)]
    #[serde(rename = "otherdata")]
    struct Otherdata {
        #[serde(rename = "@xmlns")]
        xmlns: &'static str,
        #[serde(rename = "@packages")]
        package_count: usize,
        package: Vec<XmlPackage>,
    }

    let pkgs: Vec<XmlPackage> = packages
        .iter()
        .map(|pkg| XmlPackage {
            pkgid: pkg.hash_sha256.clone(),
            name: pkg.name.clone(),
            arch: pkg.file_metadata.architecture.clone(),
            version: XmlVersion::of(pkg),
            changelog: pkg
                .file_metadata
                .changelogs
                .iter()
                .map(|c: &Changelog| XmlChangelog {
                    author: c.author.clone(),
                    date: c.date,
                    text: c.text.clone(),
                })
                .collect(),
        })
        .collect();

    new_repo_data(
        "other",
        &Otherdata {
            xmlns: XMLNS_OTHER,
            package_count: pkgs.len(),
            package: pkgs,
        },
    )
}

/// Serialize, compress and checksum one repodata document.
fn new_repo_data<T: Serialize>(kind: &'static str, value: &T) -> Fallible<(RepoData, FileArtifact)> {
    let open = format!("{}{}", XML_HEADER, to_xml(value)?);

    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(open.as_bytes())?;
    let compressed = gz.finish()?;

    let filename = format!("{}.xml.gz", kind);
    let data = RepoData {
        kind,
        checksum: RepoChecksum {
            kind: "sha256",
            value: hex::encode(Sha256::digest(&compressed)),
        },
        open_checksum: RepoChecksum {
            kind: "sha256",
            value: hex::encode(Sha256::digest(open.as_bytes())),
        },
        location: RepoLocation {
            href: format!("repodata/{}", filename),
        },
        timestamp: chrono::Utc::now().timestamp(),
        size: compressed.len() as u64,
        open_size: open.len() as u64,
    };
    Ok((data, FileArtifact::new(filename, compressed)))
}

fn to_xml<T: Serialize>(value: &T) -> Fallible<String> {
    let mut out = String::new();
    let mut ser = quick_xml::se::Serializer::new(&mut out);
    ser.indent(' ', 2);
    value.serialize(ser)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Artifact as _;
    use crate::packages::rpm::package::FileMetadata;
    use crate::packages::rpm::package::VersionMetadata;
    use pretty_assertions::assert_eq;
    use std::io::Read;

    fn package(name: &str) -> Package {
        Package {
            name: name.to_string(),
            version: "0.1.0-1".to_string(),
            version_metadata: VersionMetadata {
                summary: "demo package".to_string(),
                license: "MIT".to_string(),
                ..Default::default()
            },
            file_metadata: FileMetadata {
                architecture: "x86_64".to_string(),
                epoch: "0".to_string(),
                version: "0.1.0".to_string(),
                release: "1".to_string(),
                provides: vec![Entry {
                    name: name.to_string(),
                    flags: "EQ".to_string(),
                    version: "0.1.0".to_string(),
                    epoch: "0".to_string(),
                    release: "1".to_string(),
                }],
                files: vec![
                    FileEntry {
                        path: "/usr/bin/demo".to_string(),
                        kind: String::new(),
                        is_executable: true,
                    },
                    FileEntry {
                        path: "/usr/share/doc/demo".to_string(),
                        kind: "dir".to_string(),
                        is_executable: false,
                    },
                ],
                changelogs: vec![Changelog {
                    author: "A Dev <dev@example.com>".to_string(),
                    date: 1700000000,
                    text: "- initial release".to_string(),
                }],
                ..Default::default()
            },
            hash_sha256: "aa".repeat(32),
            size: 2048,
            file_path: format!("{}-0.1.0-1.x86_64.rpm", name),
        }
    }

    fn gunzip(data: &[u8]) -> String {
        let mut out = String::new();
        flate2::read::GzDecoder::new(data)
            .read_to_string(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn file_set_and_repomd_references() {
        let (private, _) = crypt::openpgp::generate_test_keypair("Artifact Registry").unwrap();
        let files = index(&private, &[package("demo")]).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path()).collect();
        assert_eq!(
            paths,
            vec![
                "repomd.xml",
                "repomd.xml.asc",
                "primary.xml.gz",
                "filelists.xml.gz",
                "other.xml.gz",
            ]
        );

        let repomd = std::str::from_utf8(files[0].data()).unwrap();
        assert!(repomd.starts_with(XML_HEADER));
        assert!(repomd.contains("<repomd xmlns=\"http://linux.duke.edu/metadata/repo\""));
        for href in &[
            "repodata/primary.xml.gz",
            "repodata/filelists.xml.gz",
            "repodata/other.xml.gz",
        ] {
            assert!(repomd.contains(href), "missing {}", href);
        }

        // The advertised checksums match the emitted files.
        let primary_gz = files[2].data();
        assert!(repomd.contains(&hex::encode(Sha256::digest(primary_gz))));
        let open = gunzip(primary_gz);
        assert!(repomd.contains(&hex::encode(Sha256::digest(open.as_bytes()))));

        let asc = std::str::from_utf8(files[1].data()).unwrap();
        assert!(asc.starts_with("-----BEGIN PGP SIGNATURE-----"));
    }

    #[test]
    fn primary_lists_executables_only() {
        let (private, _) = crypt::openpgp::generate_test_keypair("Artifact Registry").unwrap();
        let files = index(&private, &[package("demo")]).unwrap();

        let primary = gunzip(files[2].data());
        assert!(primary.contains("packages=\"1\""));
        assert!(primary.contains("<name>demo</name>"));
        assert!(primary.contains("pkgid=\"YES\""));
        assert!(primary.contains("<location href=\"demo-0.1.0-1.x86_64.rpm\""));
        assert!(primary.contains("/usr/bin/demo"));
        assert!(!primary.contains("/usr/share/doc/demo"));
        assert!(primary.contains("<rpm:license>MIT</rpm:license>"));
        assert!(primary.contains("<rpm:entry name=\"demo\" flags=\"EQ\""));

        let filelists = gunzip(files[3].data());
        assert!(filelists.contains("/usr/share/doc/demo"));
        assert!(filelists.contains("type=\"dir\""));

        let other = gunzip(files[4].data());
        assert!(other.contains("- initial release"));
        assert!(other.contains("date=\"1700000000\""));
    }

    #[test]
    fn empty_set_declares_zero_packages() {
        let (private, _) = crypt::openpgp::generate_test_keypair("Artifact Registry").unwrap();
        let files = index(&private, &[]).unwrap();
        let primary = gunzip(files[2].data());
        assert!(primary.contains("packages=\"0\""));
    }
}
