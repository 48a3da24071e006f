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

//! The four package formats: parsers, indexers and key material.

pub mod apk;
pub mod deb;
pub mod helm;
pub mod rpm;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::artifact::{Artifact, FileArtifact};
use commons::Result;

/// Format names, in the order they are probed by the listing surface.
pub const FORMATS: [&str; 4] = ["apk", "deb", "rpm", "helm"];

/// One package format: its typed package, key material and indexer.
///
/// The indexer is pure: the same private key and package set produce the
/// same metadata files, modulo timestamps inside signed envelopes.
pub trait Format: Send + Sync + 'static {
    type Package: Artifact + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Format name; also the manifest tag.
    const NAME: &'static str;
    /// Title of the encrypted private key layer.
    const PRIVATE_KEY_NAME: &'static str = "private.key";
    /// Title of the public key layer, served as the repository key.
    const PUBLIC_KEY_NAME: &'static str = "repository.key";

    fn generate_keypair() -> Result<(String, String)>;

    /// Regenerate every repository metadata file from the current package
    /// set. Groups without packages emit nothing, so their metadata
    /// disappears.
    fn index(private_key: &str, packages: &[Self::Package]) -> Result<Vec<FileArtifact>>;
}

/// Collect distinct values, preserving first-seen order so indexer output is
/// deterministic.
pub(crate) fn distinct<'a, I>(values: I) -> Vec<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for v in values {
        if seen.insert(v) {
            out.push(v);
        }
    }
    out
}
