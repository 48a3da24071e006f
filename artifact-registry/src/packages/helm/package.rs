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

use std::collections::BTreeMap;
use std::io::{self, Read, Seek, SeekFrom};

use flate2::read::GzDecoder;
use serde_derive::{Deserialize, Serialize};

use commons::buffer::HashedBuffer;

use crate::artifact::Artifact;

#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("Chart.yaml is missing")]
    MissingChartYaml,
    #[error("chart name is invalid")]
    InvalidName,
    #[error("chart version is invalid")]
    InvalidVersion,
    #[error("chart api version {0:?} is unsupported")]
    UnsupportedApiVersion(String),
    #[error("parsing Chart.yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("reading chart: {0}")]
    Io(#[from] io::Error),
}

impl From<PackageError> for commons::Error {
    fn from(e: PackageError) -> Self {
        commons::Error::InvalidPackage(e.to_string())
    }
}

/// `Chart.yaml` contents, kept verbatim enough to rebuild `index.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kube_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub chart_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub home: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maintainers: Vec<Maintainer>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub icon: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_version: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deprecated: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Maintainer {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

/// A packaged Helm chart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Package {
    #[serde(flatten)]
    pub metadata: ChartMetadata,
    #[serde(rename = "digest")]
    pub digest: String,
    #[serde(rename = "size")]
    pub size: u64,
    #[serde(rename = "filePath")]
    pub file_path: String,
}

impl Artifact for Package {
    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn version(&self) -> &str {
        &self.metadata.version
    }

    fn arch(&self) -> &str {
        "noarch"
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
    /// Parse a chart archive (`.tgz`) and validate its `Chart.yaml`.
    pub fn parse(buf: &mut HashedBuffer) -> Result<Package, PackageError> {
        let metadata = read_chart_metadata(&mut *buf)?;
        validate(&metadata)?;

        let size = buf.size();
        let digest = buf.sums().sha256_hex();
        buf.seek(SeekFrom::Start(0))?;
        Ok(Package {
            file_path: format!("{}-{}.tgz", metadata.name, metadata.version),
            metadata,
            digest,
            size,
        })
    }
}

fn read_chart_metadata<R: Read>(r: R) -> Result<ChartMetadata, PackageError> {
    let gz = GzDecoder::new(r);
    let mut archive = tar::Archive::new(gz);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?;
        // Charts nest their files under a top-level directory named after
        // the chart: `<name>/Chart.yaml`.
        let is_chart_yaml = path.components().count() == 2
            && path.file_name().map(|n| n == "Chart.yaml").unwrap_or(false);
        if is_chart_yaml {
            let mut content = String::new();
            entry.read_to_string(&mut content)?;
            return Ok(serde_yaml::from_str(&content)?);
        }
    }
    Err(PackageError::MissingChartYaml)
}

fn validate(metadata: &ChartMetadata) -> Result<(), PackageError> {
    if metadata.name.is_empty() {
        return Err(PackageError::InvalidName);
    }
    if metadata.version.is_empty() {
        return Err(PackageError::InvalidVersion);
    }
    match metadata.api_version.as_str() {
        "v1" | "v2" => Ok(()),
        other => Err(PackageError::UnsupportedApiVersion(other.to_string())),
    }
}
