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

//! `index.yaml` generation.

use std::collections::BTreeMap;

use serde_derive::{Deserialize, Serialize};

use commons::Result;

use super::package::{ChartMetadata, Package};
use crate::artifact::FileArtifact;

pub const INDEX_FILENAME: &str = "index.yaml";

/// The Helm repository index.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexFile {
    pub api_version: String,
    pub generated: String,
    pub entries: BTreeMap<String, Vec<ChartVersion>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChartVersion {
    #[serde(flatten)]
    pub metadata: ChartMetadata,
    pub urls: Vec<String>,
    pub created: String,
    pub digest: String,
}

/// Walk all chart artifacts into an `index.yaml`.
pub(super) fn index(packages: &[Package]) -> Result<Vec<FileArtifact>> {
    let mut entries: BTreeMap<String, Vec<ChartVersion>> = BTreeMap::new();
    let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    for pkg in packages {
        entries
            .entry(pkg.metadata.name.clone())
            .or_insert_with(Vec::new)
            .push(ChartVersion {
                metadata: pkg.metadata.clone(),
                urls: vec![pkg.file_path.clone()],
                created: now.clone(),
                digest: pkg.digest.clone(),
            });
    }
    let file = IndexFile {
        api_version: "v1".to_string(),
        generated: now,
        entries,
    };
    let yaml = serde_yaml::to_string(&file).map_err(|e| commons::Error::Internal(e.into()))?;
    Ok(vec![FileArtifact::new(INDEX_FILENAME, yaml.into_bytes())])
}
