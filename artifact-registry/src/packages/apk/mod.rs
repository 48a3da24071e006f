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

//! Alpine packages.
//!
//! <https://wiki.alpinelinux.org/wiki/Apk_spec>

mod index;
mod package;

pub use self::package::{Package, PackageError};

use crate::artifact::FileArtifact;
use crate::crypt;
use crate::packages::Format;
use commons::Result;

pub const INDEX_FILENAME: &str = "APKINDEX.tar.gz";

/// The APK format: RSA keys, `APKINDEX.tar.gz` metadata.
pub struct Apk;

impl Format for Apk {
    type Package = Package;

    const NAME: &'static str = "apk";

    fn generate_keypair() -> Result<(String, String)> {
        crypt::rsa::generate_keypair().map_err(Into::into)
    }

    fn index(private_key: &str, packages: &[Package]) -> Result<Vec<FileArtifact>> {
        index::index(private_key, packages)
    }
}
