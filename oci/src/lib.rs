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

//! Minimal OCI distribution client.
//!
//! The registry engine stores each package repository as a single OCI image
//! manifest; this crate provides the few distribution endpoints it needs:
//! tag resolution, manifest fetch/push/delete, blob fetch/push/mount, the
//! tags list and the repository catalog. Reads can be served by an optional
//! read-through proxy registry; writes always go to the primary.

mod client;
mod descriptor;
mod options;
mod reference;
mod registry;
mod repository;

pub use crate::client::AuthClient;
pub use crate::descriptor::{
    Descriptor, Digest, Manifest, ANNOTATION_CREATED, ANNOTATION_TITLE, EMPTY_CONFIG_MEDIA_TYPE,
    EMPTY_JSON, MANIFEST_MEDIA_TYPE,
};
pub use crate::options::{ClientCache, ClientOptions, Credentials};
pub use crate::reference::Reference;
pub use crate::registry::Registry;
pub use crate::repository::{body_from_reader, BlobStream, Repository};
