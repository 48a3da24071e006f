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

use std::sync::Arc;

use oci::{ClientCache, ClientOptions, Credentials, Registry};

use commons::cache::Cache;
use commons::mutex::KeyedMutex;
use commons::{Error, Result};

use crate::packages::Format;
use crate::storage::Storage;

/// Read-through proxy registry used for fetches; writes never touch it.
#[derive(Clone, Debug, Default)]
pub struct ProxyOptions {
    pub host: String,
    pub options: ClientOptions,
}

/// Startup configuration of the storage engine.
///
/// Per-request state (credentials) stays out of here on purpose; it flows in
/// through the [`Credentials`] capability on each call.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Upstream OCI registry host backing all repositories.
    pub backend: String,
    /// 32-byte AES wrapping key for repository private keys.
    pub key: [u8; 32],
    /// Additionally tag every pushed artifact as its own image.
    pub artifact_tags: bool,
    /// Pinned repository name; hides `{repo}` path segments when set.
    pub repo: Option<String>,
    /// Connection options for the backend registry.
    pub client: ClientOptions,
    /// Optional read-through proxy registry.
    pub proxy: Option<ProxyOptions>,
}

impl EngineConfig {
    pub fn new<B: Into<String>>(backend: B, key: [u8; 32]) -> Self {
        EngineConfig {
            backend: backend.into(),
            key,
            artifact_tags: false,
            repo: None,
            client: ClientOptions::default(),
            proxy: None,
        }
    }
}

/// The storage engine: shared caches, locks and client pools.
///
/// One engine per process; every request gets its own [`Storage`] handle
/// from it.
pub struct Engine {
    config: EngineConfig,
    clients: ClientCache,
    pub(crate) manifests: Cache<oci::Manifest>,
    pub(crate) keys: Cache<String>,
    pub(crate) locks: KeyedMutex,
}

impl Engine {
    /// Must be called from within a Tokio runtime.
    pub fn new(config: EngineConfig) -> Arc<Self> {
        Arc::new(Engine {
            config,
            clients: ClientCache::new(),
            manifests: Cache::new(),
            keys: Cache::new(),
            locks: KeyedMutex::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resolve the effective repository name for a request.
    pub fn repo_name(&self, requested: Option<&str>) -> Result<String> {
        match requested {
            Some(name) if !name.is_empty() => Ok(name.trim_end_matches('/').to_string()),
            _ => match &self.config.repo {
                Some(name) => Ok(name.clone()),
                None => Err(Error::BadRequest("repository name is required".into())),
            },
        }
    }

    /// A registry handle bound to the caller's credentials.
    pub fn registry(&self, credentials: Option<&Credentials>) -> Result<Registry> {
        let client = self
            .clients
            .client(&self.config.backend, &self.config.client, credentials)?;
        let proxy = match &self.config.proxy {
            Some(proxy) => Some(self.clients.client(&proxy.host, &proxy.options, None)?),
            None => None,
        };
        Ok(Registry::new(client, proxy))
    }

    pub(crate) fn repository(
        &self,
        credentials: Option<&Credentials>,
        name: &str,
    ) -> Result<oci::Repository> {
        Ok(self.registry(credentials)?.repository(name))
    }

    /// Construct the request-scoped storage handle for one repository and
    /// format, fetching the repository key when the manifest exists.
    pub async fn storage<F: Format>(
        self: Arc<Self>,
        credentials: Option<Credentials>,
        name: &str,
    ) -> Result<Storage<F>> {
        Storage::new(self, credentials, name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn repo_name_resolution() {
        let engine = Engine::new(EngineConfig::new("registry.example.com", [0u8; 32]));
        assert_eq!(engine.repo_name(Some("my/repo")).unwrap(), "my/repo");
        assert_eq!(engine.repo_name(Some("my/repo/")).unwrap(), "my/repo");
        assert!(engine.repo_name(None).is_err());
        assert!(engine.repo_name(Some("")).is_err());

        let mut config = EngineConfig::new("registry.example.com", [0u8; 32]);
        config.repo = Some("pinned".to_string());
        let engine = Engine::new(config);
        assert_eq!(engine.repo_name(None).unwrap(), "pinned");
        assert_eq!(engine.repo_name(Some("other")).unwrap(), "other");
    }
}
