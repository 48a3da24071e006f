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

use std::io::Read;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use reqwest::header;
use reqwest::StatusCode;
use serde_derive::Deserialize;

use commons::{Error, Result};

use crate::client::{error_for, http_err, AuthClient};
use crate::descriptor::{Descriptor, Digest, Manifest, MANIFEST_MEDIA_TYPE};

/// Streamed blob content.
pub type BlobStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// One repository within a registry.
///
/// Reads prefer the proxy when one is configured and fall back to the
/// primary on not-found; writes always address the primary.
pub struct Repository {
    client: Arc<AuthClient>,
    proxy: Option<Arc<AuthClient>>,
    name: String,
}

/// Read-side client ordering: proxy first, then the primary.
struct ReadFallback<'a> {
    clients: Vec<&'a Arc<AuthClient>>,
}

impl<'a> ReadFallback<'a> {
    fn new(primary: &'a Arc<AuthClient>, proxy: &'a Option<Arc<AuthClient>>) -> Self {
        let mut clients = Vec::with_capacity(2);
        if let Some(p) = proxy {
            clients.push(p);
        }
        clients.push(primary);
        ReadFallback { clients }
    }
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

impl Repository {
    pub(crate) fn new(
        client: Arc<AuthClient>,
        proxy: Option<Arc<AuthClient>>,
        name: &str,
    ) -> Self {
        Repository {
            client,
            proxy,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn pull_scope(&self) -> String {
        format!("repository:{}:pull", self.name)
    }

    fn push_scope(&self) -> String {
        format!("repository:{}:pull,push", self.name)
    }

    /// Resolve a tag (or digest) to its manifest descriptor.
    pub async fn resolve(&self, reference: &str) -> Result<Descriptor> {
        let scope = self.pull_scope();
        let what = format!("{}:{}", self.name, reference);
        let mut last = None;
        for client in ReadFallback::new(&self.client, &self.proxy).clients {
            let url = format!("{}/v2/{}/manifests/{}", client_base(client), self.name, reference);
            let resp = client
                .execute(&scope, |c| {
                    c.head(&url)
                        .header(header::ACCEPT, MANIFEST_MEDIA_TYPE)
                })
                .await?;
            if !resp.status().is_success() {
                let err = error_for(&what, resp).await;
                if err.is_not_found() {
                    last = Some(err);
                    continue;
                }
                return Err(err);
            }
            let digest = resp
                .headers()
                .get("docker-content-digest")
                .and_then(|v| v.to_str().ok())
                .map(Digest::from_str_unchecked)
                .ok_or_else(|| Error::Upstream {
                    status: 502,
                    message: format!("{}: missing digest header", what),
                })?;
            let size = resp
                .headers()
                .get(header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let media_type = resp
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or(MANIFEST_MEDIA_TYPE)
                .to_string();
            return Ok(Descriptor {
                media_type,
                digest,
                size,
                annotations: Default::default(),
                data: None,
            });
        }
        Err(last.unwrap_or_else(|| Error::not_found(what)))
    }

    /// Fetch and decode the manifest behind a resolved descriptor.
    pub async fn manifest(&self, desc: &Descriptor) -> Result<Manifest> {
        let scope = self.pull_scope();
        let what = format!("{}@{}", self.name, desc.digest);
        let mut last = None;
        for client in ReadFallback::new(&self.client, &self.proxy).clients {
            let url = format!(
                "{}/v2/{}/manifests/{}",
                client_base(client),
                self.name,
                desc.digest
            );
            let resp = client
                .execute(&scope, |c| {
                    c.get(&url).header(header::ACCEPT, MANIFEST_MEDIA_TYPE)
                })
                .await?;
            if !resp.status().is_success() {
                let err = error_for(&what, resp).await;
                if err.is_not_found() {
                    last = Some(err);
                    continue;
                }
                return Err(err);
            }
            return resp.json().await.map_err(http_err);
        }
        Err(last.unwrap_or_else(|| Error::not_found(what)))
    }

    /// Push a manifest to `reference` (a tag or a digest).
    pub async fn push_manifest(&self, reference: &str, manifest: &Manifest) -> Result<Descriptor> {
        let body = serde_json::to_vec(manifest)
            .map_err(|e| Error::Internal(e.into()))?;
        let desc = Descriptor::from_data(MANIFEST_MEDIA_TYPE, &body);
        let scope = self.push_scope();
        let url = format!(
            "{}/v2/{}/manifests/{}",
            client_base(&self.client),
            self.name,
            reference
        );
        let resp = self
            .client
            .execute(&scope, |c| {
                c.put(&url)
                    .header(header::CONTENT_TYPE, MANIFEST_MEDIA_TYPE)
                    .body(body.clone())
            })
            .await?;
        if !resp.status().is_success() {
            return Err(error_for(&format!("{}:{}", self.name, reference), resp).await);
        }
        Ok(desc)
    }

    /// Delete the manifest behind `digest`.
    pub async fn delete_manifest(&self, digest: &Digest) -> Result<()> {
        let scope = self.push_scope();
        let url = format!(
            "{}/v2/{}/manifests/{}",
            client_base(&self.client),
            self.name,
            digest
        );
        let resp = self.client.execute(&scope, |c| c.delete(&url)).await?;
        if !resp.status().is_success() {
            return Err(error_for(&format!("{}@{}", self.name, digest), resp).await);
        }
        Ok(())
    }

    /// List the repository tags.
    pub async fn tags(&self) -> Result<Vec<String>> {
        let scope = self.pull_scope();
        let url = format!("{}/v2/{}/tags/list", client_base(&self.client), self.name);
        let resp = self.client.execute(&scope, |c| c.get(&url)).await?;
        if !resp.status().is_success() {
            return Err(error_for(&self.name, resp).await);
        }
        let tags: TagsResponse = resp.json().await.map_err(http_err)?;
        Ok(tags.tags.unwrap_or_default())
    }

    /// Fetch a whole blob into memory. Only for small blobs (keys, metadata).
    pub async fn blob(&self, digest: &Digest) -> Result<Vec<u8>> {
        let resp = self.fetch_blob(digest).await?;
        let bytes = resp.bytes().await.map_err(http_err)?;
        Ok(bytes.to_vec())
    }

    /// Stream a blob without buffering it.
    pub async fn blob_stream(&self, digest: &Digest) -> Result<BlobStream> {
        use futures::TryStreamExt;
        let resp = self.fetch_blob(digest).await?;
        let stream = resp
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(Box::pin(stream))
    }

    async fn fetch_blob(&self, digest: &Digest) -> Result<reqwest::Response> {
        let scope = self.pull_scope();
        let what = format!("{}@{}", self.name, digest);
        let mut last = None;
        for client in ReadFallback::new(&self.client, &self.proxy).clients {
            let url = format!("{}/v2/{}/blobs/{}", client_base(client), self.name, digest);
            let resp = client.execute(&scope, |c| c.get(&url)).await?;
            if !resp.status().is_success() {
                let err = error_for(&what, resp).await;
                if err.is_not_found() {
                    last = Some(err);
                    continue;
                }
                return Err(err);
            }
            return Ok(resp);
        }
        Err(last.unwrap_or_else(|| Error::not_found(what)))
    }

    /// Whether the primary already has the blob.
    pub async fn has_blob(&self, digest: &Digest) -> Result<bool> {
        let scope = self.pull_scope();
        let url = format!(
            "{}/v2/{}/blobs/{}",
            client_base(&self.client),
            self.name,
            digest
        );
        let resp = self.client.execute(&scope, |c| c.head(&url)).await?;
        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(error_for(&format!("{}@{}", self.name, digest), resp).await),
        }
    }

    /// Upload a blob with a monolithic PUT, skipping when it already exists.
    pub async fn push_blob(
        &self,
        digest: &Digest,
        size: u64,
        body: reqwest::Body,
    ) -> Result<()> {
        if self.has_blob(digest).await? {
            log::debug!("blob {} already present in {}", digest, self.name);
            return Ok(());
        }
        let location = self.start_upload().await?;
        let scope = self.push_scope();
        let url = upload_url(&location, digest);
        let resp = self
            .client
            .execute_once(
                &scope,
                self.client
                    .request(reqwest::Method::PUT, &url)
                    .header(header::CONTENT_TYPE, "application/octet-stream")
                    .header(header::CONTENT_LENGTH, size)
                    .body(body),
            )
            .await?;
        if !resp.status().is_success() {
            return Err(error_for(&format!("{}@{}", self.name, digest), resp).await);
        }
        Ok(())
    }

    /// Upload a small in-memory blob.
    pub async fn push_blob_bytes(&self, digest: &Digest, data: Vec<u8>) -> Result<()> {
        let size = data.len() as u64;
        self.push_blob(digest, size, data.into()).await
    }

    /// Cross-repository blob mount, falling back to a copy through this
    /// process when the registry does not support mounting.
    pub async fn mount_blob(&self, digest: &Digest, from: &Repository) -> Result<()> {
        if self.has_blob(digest).await? {
            return Ok(());
        }
        let scope = self.push_scope();
        let url = format!(
            "{}/v2/{}/blobs/uploads/",
            client_base(&self.client),
            self.name
        );
        let resp = self
            .client
            .execute(&scope, |c| {
                c.post(&url)
                    .query(&[("mount", digest.as_str()), ("from", from.name())])
            })
            .await?;
        if resp.status() == StatusCode::CREATED {
            return Ok(());
        }
        // The registry answered with an upload session instead of a mount;
        // copy the blob through.
        let data = from.blob(digest).await?;
        match resp
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
        {
            Some(location) => {
                let url = upload_url(&self.absolute(location), digest);
                let resp = self
                    .client
                    .execute_once(
                        &scope,
                        self.client
                            .request(reqwest::Method::PUT, &url)
                            .header(header::CONTENT_TYPE, "application/octet-stream")
                            .body(data),
                    )
                    .await?;
                if !resp.status().is_success() {
                    return Err(error_for(&format!("{}@{}", self.name, digest), resp).await);
                }
                Ok(())
            }
            None => self.push_blob_bytes(digest, data).await,
        }
    }

    async fn start_upload(&self) -> Result<String> {
        let scope = self.push_scope();
        let url = format!(
            "{}/v2/{}/blobs/uploads/",
            client_base(&self.client),
            self.name
        );
        let resp = self.client.execute(&scope, |c| c.post(&url)).await?;
        if resp.status() != StatusCode::ACCEPTED {
            return Err(error_for(&format!("{}: blob upload", self.name), resp).await);
        }
        let location = resp
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::Upstream {
                status: 502,
                message: format!("{}: upload session without location", self.name),
            })?;
        Ok(self.absolute(location))
    }

    fn absolute(&self, location: &str) -> String {
        if location.starts_with("http://") || location.starts_with("https://") {
            location.to_string()
        } else {
            let base = client_base(&self.client);
            format!("{}{}", base, location)
        }
    }

}

fn client_base(client: &Arc<AuthClient>) -> String {
    let url = client.base_url();
    url.trim_end_matches("/v2").to_string()
}

fn upload_url(location: &str, digest: &Digest) -> String {
    if location.contains('?') {
        format!("{}&digest={}", location, digest)
    } else {
        format!("{}?digest={}", location, digest)
    }
}

/// Expose a blocking reader as a streaming request body.
///
/// Chunks are read on the blocking pool so large packages never sit in
/// memory as a whole.
pub fn body_from_reader<R>(reader: R) -> reqwest::Body
where
    R: Read + Send + 'static,
{
    let stream = futures::stream::try_unfold(reader, |mut reader| async move {
        let (chunk, reader) = tokio::task::spawn_blocking(move || {
            let mut chunk = vec![0u8; 64 * 1024];
            let n = reader.read(&mut chunk)?;
            chunk.truncate(n);
            Ok::<_, std::io::Error>((chunk, reader))
        })
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;
        if chunk.is_empty() {
            Ok::<_, std::io::Error>(None)
        } else {
            Ok(Some((Bytes::from(chunk), reader)))
        }
    });
    reqwest::Body::wrap_stream(stream)
}
