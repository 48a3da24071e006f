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

//! Key generation and signing primitives.
//!
//! APK repositories sign with raw RSA/SHA-1, DEB and RPM with OpenPGP; the
//! per-repository private key is stored AES-GCM wrapped in the repository
//! manifest itself.

pub mod aes;
pub mod openpgp;
pub mod rsa;
