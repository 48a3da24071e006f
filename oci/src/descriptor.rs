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
use std::fmt;

use serde_derive::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
pub const EMPTY_CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.empty.v1+json";
pub const ANNOTATION_TITLE: &str = "org.opencontainers.image.title";
pub const ANNOTATION_CREATED: &str = "org.opencontainers.image.created";

/// Content of the empty config blob referenced by keys-only manifests.
pub const EMPTY_JSON: &[u8] = b"{}";

/// A `sha256:<hex>` content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    pub fn from_bytes(data: &[u8]) -> Self {
        Digest(format!("sha256:{}", hex::encode(Sha256::digest(data))))
    }

    /// Wrap an already hex-encoded sha256 value.
    pub fn from_encoded(encoded: &str) -> Self {
        Digest(format!("sha256:{}", encoded))
    }

    pub fn from_str_unchecked<S: Into<String>>(s: S) -> Self {
        Digest(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The hex part, without the algorithm prefix.
    pub fn encoded(&self) -> &str {
        self.0.splitn(2, ':').nth(1).unwrap_or(&self.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An OCI content descriptor.
///
/// Package layers carry the artifact metadata JSON in `data`, so reads can
/// decode a package without fetching its blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: Digest,
    pub size: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
}

impl Descriptor {
    pub fn from_data<M: Into<String>>(media_type: M, data: &[u8]) -> Self {
        Descriptor {
            media_type: media_type.into(),
            digest: Digest::from_bytes(data),
            size: data.len() as u64,
            annotations: BTreeMap::new(),
            data: None,
        }
    }

    pub fn empty_config() -> Self {
        Descriptor::from_data(EMPTY_CONFIG_MEDIA_TYPE, EMPTY_JSON)
    }

    pub fn with_title<T: Into<String>>(mut self, title: T) -> Self {
        self.annotations
            .insert(ANNOTATION_TITLE.to_string(), title.into());
        self
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = Some(data);
        self
    }

    /// The layer title annotation, i.e. the file path within the repository.
    pub fn title(&self) -> Option<&str> {
        self.annotations.get(ANNOTATION_TITLE).map(String::as_str)
    }
}

/// An OCI image manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Manifest {
    /// Assemble a manifest the way `oras` packs them: schema version 2, the
    /// OCI manifest media type, an explicit artifact type and a created
    /// annotation.
    pub fn pack(artifact_type: &str, config: Descriptor, layers: Vec<Descriptor>) -> Self {
        let mut annotations = BTreeMap::new();
        annotations.insert(
            ANNOTATION_CREATED.to_string(),
            chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        );
        Manifest {
            schema_version: 2,
            media_type: Some(MANIFEST_MEDIA_TYPE.to_string()),
            artifact_type: Some(artifact_type.to_string()),
            config,
            layers,
            annotations,
        }
    }

    pub fn created(&self) -> Option<&str> {
        self.annotations.get(ANNOTATION_CREATED).map(String::as_str)
    }

    /// Look up a layer by its title annotation.
    pub fn find_layer(&self, title: &str) -> Option<&Descriptor> {
        self.layers.iter().find(|l| l.title() == Some(title))
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(bytes) => s.serialize_str(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw {
            Some(s) => STANDARD
                .decode(s.as_bytes())
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
