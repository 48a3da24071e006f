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

use std::io::{self, Seek, SeekFrom};

use rpm::signature::pgp::Signer;
use serde_derive::{Deserialize, Serialize};

use commons::buffer::HashedBuffer;

use crate::artifact::Artifact;

#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("parsing rpm: {0}")]
    Parse(rpm::Error),
    #[error("signing rpm: {0}")]
    Sign(rpm::Error),
    #[error("reading package: {0}")]
    Io(#[from] io::Error),
}

impl From<PackageError> for commons::Error {
    fn from(e: PackageError) -> Self {
        commons::Error::InvalidPackage(e.to_string())
    }
}

/// An RPM package.
///
/// The stored blob is not the uploaded stream: a fresh signature header is
/// generated with the repository key and replaces the original, so size and
/// digest describe the re-signed package.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub name: String,
    pub version: String,
    pub version_metadata: VersionMetadata,
    pub file_metadata: FileMetadata,
    pub hash_sha256: String,
    pub size: u64,
    pub file_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionMetadata {
    #[serde(default, rename = "projectURL", skip_serializing_if = "String::is_empty")]
    pub project_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub license: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub architecture: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub epoch: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub release: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vendor: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub packager: String,
    #[serde(default, rename = "sourceRPM", skip_serializing_if = "String::is_empty")]
    pub source_rpm: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub build_host: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub build_time: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub file_time: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub installed_size: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub archive_size: u64,
    #[serde(default, rename = "provide", skip_serializing_if = "Vec::is_empty")]
    pub provides: Vec<Entry>,
    #[serde(default, rename = "require", skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<Entry>,
    #[serde(default, rename = "conflict", skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<Entry>,
    #[serde(default, rename = "obsolete", skip_serializing_if = "Vec::is_empty")]
    pub obsoletes: Vec<Entry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changelogs: Vec<Changelog>,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

/// A versioned dependency relation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub flags: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub epoch: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub release: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(rename = "isExecutable")]
    pub is_executable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Changelog {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub author: String,
    #[serde(default)]
    pub date: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
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
        oci::Digest::from_encoded(&self.hash_sha256)
    }
}

impl Package {
    /// Parse the uploaded RPM and re-sign it with the repository key.
    ///
    /// Returns the package metadata and the re-signed stream to store;
    /// `buf` is consumed as the signature header it carries is replaced.
    pub fn parse(
        buf: &mut HashedBuffer,
        private_key: &str,
    ) -> Result<(Package, HashedBuffer), PackageError> {
        let mut reader = io::BufReader::new(&mut *buf);
        let mut rpm_pkg = rpm::Package::parse(&mut reader).map_err(PackageError::Parse)?;

        let signer = Signer::load_from_asc(private_key).map_err(PackageError::Sign)?;
        rpm_pkg.sign(signer).map_err(PackageError::Sign)?;

        let mut signed = HashedBuffer::new();
        rpm_pkg.write(&mut signed).map_err(PackageError::Sign)?;
        signed.seek(SeekFrom::Start(0))?;

        let mut pkg = extract_metadata(&rpm_pkg.metadata);
        pkg.hash_sha256 = signed.sums().sha256_hex();
        pkg.size = signed.size();
        pkg.file_path = format!(
            "{}-{}.{}.rpm",
            pkg.name, pkg.version, pkg.file_metadata.architecture
        );

        Ok((pkg, signed))
    }
}

fn extract_metadata(meta: &rpm::PackageMetadata) -> Package {
    let epoch = meta
        .get_epoch()
        .map(|e| e.to_string())
        .unwrap_or_else(|_| String::new());
    let version = opt_str(meta.get_version());
    let release = opt_str(meta.get_release());

    let mut full_version = format!("{}-{}", version, release);
    if !epoch.is_empty() && epoch != "0" {
        full_version = format!("{}-{}", epoch, full_version);
    }

    let mut project_url = opt_str(meta.get_url());
    if url::Url::parse(&project_url).is_err() {
        project_url = String::new();
    }

    Package {
        name: opt_str(meta.get_name()),
        version: full_version,
        version_metadata: VersionMetadata {
            project_url,
            summary: opt_str(meta.get_summary()),
            description: opt_str(meta.get_description()),
            license: opt_str(meta.get_license()),
        },
        file_metadata: FileMetadata {
            architecture: opt_str(meta.get_arch()),
            epoch,
            version,
            release,
            vendor: opt_str(meta.get_vendor()),
            group: opt_str(meta.get_group()),
            packager: opt_str(meta.get_packager()),
            source_rpm: opt_str(meta.get_source_rpm()),
            build_host: opt_str(meta.get_build_host()),
            build_time: meta.get_build_time().unwrap_or(0),
            file_time: file_mtime(meta),
            installed_size: meta.get_installed_size().unwrap_or(0),
            archive_size: meta.get_payload_size().unwrap_or(0),
            provides: entries(meta.get_provides()),
            requires: entries(meta.get_requires()),
            conflicts: entries(meta.get_conflicts()),
            obsoletes: entries(meta.get_obsoletes()),
            files: files(meta),
            changelogs: changelogs(meta),
        },
        ..Default::default()
    }
}

fn opt_str<E>(r: Result<&str, E>) -> String {
    r.map(str::to_string).unwrap_or_default()
}

fn file_mtime(meta: &rpm::PackageMetadata) -> u64 {
    meta.get_file_entries()
        .ok()
        .and_then(|entries| {
            entries.first().map(|e| {
                let seconds: u32 = e.modified_at.into();
                u64::from(seconds)
            })
        })
        .unwrap_or(0)
}

fn entries(deps: Result<Vec<rpm::Dependency>, rpm::Error>) -> Vec<Entry> {
    let deps = match deps {
        Ok(deps) => deps,
        Err(_) => return Vec::new(),
    };
    deps.into_iter()
        .map(|dep| {
            let flags = if dep.flags.contains(rpm::DependencyFlags::GREATER)
                && dep.flags.contains(rpm::DependencyFlags::EQUAL)
            {
                "GE"
            } else if dep.flags.contains(rpm::DependencyFlags::LESS)
                && dep.flags.contains(rpm::DependencyFlags::EQUAL)
            {
                "LE"
            } else if dep.flags.contains(rpm::DependencyFlags::GREATER) {
                "GT"
            } else if dep.flags.contains(rpm::DependencyFlags::LESS) {
                "LT"
            } else if dep.flags.contains(rpm::DependencyFlags::EQUAL) {
                "EQ"
            } else {
                ""
            };

            let mut entry = Entry {
                name: dep.name,
                flags: flags.to_string(),
                ..Default::default()
            };
            if !dep.version.is_empty() {
                let (evr, release) = match dep.version.split_once('-') {
                    Some((evr, release)) => (evr, Some(release)),
                    None => (dep.version.as_str(), None),
                };
                match evr.split_once(':') {
                    Some((epoch, version)) => {
                        entry.epoch = epoch.to_string();
                        entry.version = version.to_string();
                    }
                    None => {
                        entry.epoch = "0".to_string();
                        entry.version = evr.to_string();
                    }
                }
                if let Some(release) = release {
                    entry.release = release.to_string();
                }
            }
            entry
        })
        .collect()
}

fn files(meta: &rpm::PackageMetadata) -> Vec<FileEntry> {
    let entries = match meta.get_file_entries() {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };
    entries
        .into_iter()
        .map(|entry| {
            let mut kind = String::new();
            let mut is_executable = false;
            if entry.flags.contains(rpm::FileFlags::GHOST) {
                kind = "ghost".to_string();
            } else {
                match entry.mode {
                    rpm::FileMode::Dir { .. } => kind = "dir".to_string(),
                    rpm::FileMode::Regular { permissions } => {
                        is_executable = permissions & 0o111 != 0;
                    }
                    _ => {}
                }
            }
            FileEntry {
                path: entry.path.to_string_lossy().into_owned(),
                kind,
                is_executable,
            }
        })
        .collect()
}

fn changelogs(meta: &rpm::PackageMetadata) -> Vec<Changelog> {
    let entries = match meta.get_changelog_entries() {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };
    entries
        .into_iter()
        .map(|entry| Changelog {
            author: entry.name,
            date: entry.timestamp as i64,
            text: entry.description,
        })
        .collect()
}
