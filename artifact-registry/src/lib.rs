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

//! OCI-backed multi-format package repository engine.
//!
//! Each `(host, repository, format)` triple is stored as one OCI image
//! manifest whose layers are the packages, the generated repository
//! metadata, and the repository signing keys. The format modules provide
//! the package parsers and the pure metadata indexers; [`storage::Storage`]
//! is the state machine that mutates the manifest.

mod artifact;
pub mod crypt;
mod engine;
mod listing;
pub mod media;
pub mod packages;
pub mod storage;

pub use crate::artifact::{Artifact, ArtifactInfo, FileArtifact};
pub use crate::engine::{Engine, EngineConfig, ProxyOptions};
pub use crate::listing::{RepositoryInfo, Stats};
pub use crate::packages::Format;
pub use crate::storage::Storage;
