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

//! Repository listing and credential probing.

use futures::stream::{self, StreamExt, TryStreamExt};
use serde_derive::{Deserialize, Serialize};

use oci::Credentials;

use commons::cache::DEFAULT_TTL;
use commons::Result;

use crate::engine::Engine;
use crate::media;
use crate::packages::FORMATS;

/// How many per-format manifest scans run concurrently.
const SCAN_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub size: u64,
    pub count: u64,
}

/// One `(repository, format)` pair with its layer statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "type")]
    pub format: String,
    pub size: u64,
    #[serde(rename = "lastUpdated", skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    pub metadata: Stats,
    pub packages: Stats,
}

fn requested_formats(format: Option<&str>) -> Vec<&str> {
    match format {
        Some(f) if !f.is_empty() => vec![f],
        _ => FORMATS.to_vec(),
    }
}

impl Engine {
    /// Per-format statistics of one repository, scanning the manifests
    /// concurrently.
    pub async fn repository_stats(
        &self,
        credentials: Option<&Credentials>,
        name: &str,
        format: Option<&str>,
    ) -> Result<Vec<RepositoryInfo>> {
        let registry = self.registry(credentials)?;
        let repo = registry.repository(name);
        let mut out: Vec<RepositoryInfo> = stream::iter(requested_formats(format))
            .map(|fmt| {
                let repo = &repo;
                async move { self.scan_manifest(repo, name, fmt).await }
            })
            .buffer_unordered(SCAN_CONCURRENCY)
            .try_filter_map(|info| async move { Ok(info) })
            .try_collect()
            .await?;
        out.sort_by(|a, b| a.format.cmp(&b.format));
        Ok(out)
    }

    /// Statistics of every repository in the backend registry.
    pub async fn list_repositories(
        &self,
        credentials: Option<&Credentials>,
        format: Option<&str>,
    ) -> Result<Vec<RepositoryInfo>> {
        let registry = self.registry(credentials)?;
        let mut names = Vec::new();
        registry
            .repositories(None, |page| {
                names.extend(page);
                Ok(true)
            })
            .await?;

        let mut out = Vec::new();
        for name in names {
            out.extend(self.repository_stats(credentials, &name, format).await?);
        }
        Ok(out)
    }

    /// Probe the caller's credentials by resolving format tags.
    ///
    /// Without a repository name the catalog endpoint is probed instead. A
    /// missing manifest is not an authentication failure.
    pub async fn login(
        &self,
        credentials: Option<&Credentials>,
        name: Option<&str>,
        format: Option<&str>,
    ) -> Result<()> {
        let registry = self.registry(credentials)?;
        let name = match name {
            Some(name) if !name.is_empty() => name,
            _ => {
                return registry.repositories(None, |_| Ok(false)).await;
            }
        };
        let repo = registry.repository(name);
        for fmt in requested_formats(format) {
            match repo.resolve(fmt).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Scan one repository manifest into listing statistics.
    async fn scan_manifest(
        &self,
        repo: &oci::Repository,
        name: &str,
        format: &str,
    ) -> Result<Option<RepositoryInfo>> {
        let desc = match repo.resolve(format).await {
            Ok(desc) => desc,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let cache_key = desc.digest.to_string();
        let manifest = match self.manifests.get(&cache_key) {
            Some(m) => m,
            None => {
                let m = repo.manifest(&desc).await?;
                self.manifests.set(cache_key, m.clone(), Some(DEFAULT_TTL));
                m
            }
        };

        // Do not leak the repository name in single-repository mode.
        let display_name = if self.config().repo.is_some() {
            String::new()
        } else {
            format!("{}/{}", self.config().backend, name)
        };
        let mut info = RepositoryInfo {
            name: display_name,
            format: format.to_string(),
            last_updated: manifest.created().map(String::from),
            ..Default::default()
        };

        let package_layer = media::package_layer(format);
        let mut seen = std::collections::HashSet::new();
        for layer in &manifest.layers {
            let first = seen.insert(layer.digest.clone());
            if first {
                info.size += layer.size;
            }
            if layer.media_type == package_layer {
                info.packages.count += 1;
                if first {
                    info.packages.size += layer.size;
                }
            } else {
                info.metadata.count += 1;
                if first {
                    info.metadata.size += layer.size;
                }
            }
        }
        Ok(Some(info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use oci::{Descriptor, Manifest};
    use pretty_assertions::assert_eq;

    fn manifest_with_layers() -> Manifest {
        let key = Descriptor::from_data(
            "application/vnd.lk.registry.metadata.layer.v1.apk+key",
            b"key-data",
        )
        .with_title("private.key");
        let pkg = Descriptor::from_data("application/vnd.lk.registry.layer.v1.apk", b"pkg-data")
            .with_title("v3.19/main/x86_64/jq-1.7-r0.apk");
        // The same blob stored under a second title counts once for size.
        let dup = Descriptor::from_data("application/vnd.lk.registry.layer.v1.apk", b"pkg-data")
            .with_title("v3.19/main/x86_64/jq-copy.apk");
        Manifest::pack(
            "application/vnd.lk.registry+apk",
            Descriptor::empty_config(),
            vec![key, pkg, dup],
        )
    }

    #[tokio::test]
    async fn stats_count_layers_and_dedupe_sizes() {
        let mut server = mockito::Server::new_async().await;
        let manifest = manifest_with_layers();
        let body = serde_json::to_vec(&manifest).unwrap();
        let desc = Descriptor::from_data(oci::MANIFEST_MEDIA_TYPE, &body);
        server
            .mock("HEAD", "/v2/my-repo/manifests/apk")
            .with_header("docker-content-digest", desc.digest.as_str())
            .create_async()
            .await;
        server
            .mock(
                "GET",
                format!("/v2/my-repo/manifests/{}", desc.digest).as_str(),
            )
            .with_body(body)
            .create_async()
            .await;
        for missing in &["deb", "rpm", "helm"] {
            server
                .mock("HEAD", format!("/v2/my-repo/manifests/{}", missing).as_str())
                .with_status(404)
                .create_async()
                .await;
        }

        let mut config = EngineConfig::new(server.host_with_port(), [0u8; 32]);
        config.client.plain_http = true;
        let engine = Engine::new(config);

        let stats = engine.repository_stats(None, "my-repo", None).await.unwrap();
        assert_eq!(stats.len(), 1);
        let info = &stats[0];
        assert_eq!(info.format, "apk");
        assert_eq!(info.packages.count, 2);
        assert_eq!(info.metadata.count, 1);
        // Two package layers share a digest: counted twice, sized once.
        assert_eq!(info.packages.size, 8);
        assert_eq!(info.size, info.packages.size + info.metadata.size);
        assert!(info.last_updated.is_some());
        assert!(info.name.ends_with("/my-repo"));
    }

    #[tokio::test]
    async fn login_probes_tags_and_tolerates_missing_manifests() {
        let mut server = mockito::Server::new_async().await;
        for fmt in &FORMATS {
            server
                .mock("HEAD", format!("/v2/my-repo/manifests/{}", fmt).as_str())
                .with_status(404)
                .create_async()
                .await;
        }
        let mut config = EngineConfig::new(server.host_with_port(), [0u8; 32]);
        config.client.plain_http = true;
        let engine = Engine::new(config);

        // All manifests missing is still a successful login.
        engine.login(None, Some("my-repo"), None).await.unwrap();
    }
}
