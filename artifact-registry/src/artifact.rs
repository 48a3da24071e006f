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

use oci::Digest;

/// A typed package or synthetic file stored as an OCI layer.
pub trait Artifact {
    /// Logical identifier, e.g. `jq`.
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    /// May be empty, or `noarch` for charts.
    fn arch(&self) -> &str;
    /// Canonical relative filename inside the repository namespace.
    fn path(&self) -> &str;
    /// Content size in bytes.
    fn size(&self) -> u64;
    /// SHA-256 of the content.
    fn digest(&self) -> Digest;
}

/// A synthetic artifact produced by an indexer (index files, keys).
#[derive(Debug, Clone, PartialEq)]
pub struct FileArtifact {
    path: String,
    data: Vec<u8>,
    digest: Digest,
}

impl FileArtifact {
    pub fn new<P: Into<String>>(path: P, data: Vec<u8>) -> Self {
        let digest = Digest::from_bytes(&data);
        FileArtifact {
            path: path.into(),
            data,
            digest,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Filename without the directory part.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

impl Artifact for FileArtifact {
    fn name(&self) -> &str {
        self.file_name()
    }

    fn version(&self) -> &str {
        ""
    }

    fn arch(&self) -> &str {
        ""
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn digest(&self) -> Digest {
        self.digest.clone()
    }
}

/// Descriptor-level information about a stored artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactInfo {
    pub path: String,
    pub size: u64,
    pub digest: Digest,
    /// The artifact metadata JSON embedded at push time; empty for key and
    /// metadata layers.
    pub metadata: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_artifact_accessors() {
        let f = FileArtifact::new("dists/stable/Release", b"data".to_vec());
        assert_eq!(f.path(), "dists/stable/Release");
        assert_eq!(f.name(), "Release");
        assert_eq!(f.file_name(), "Release");
        assert_eq!(f.size(), 4);
        assert_eq!(f.digest(), Digest::from_bytes(b"data"));
        assert_eq!(f.version(), "");
        assert_eq!(f.arch(), "");
    }
}
