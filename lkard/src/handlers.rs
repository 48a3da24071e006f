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

//! Shared plumbing for the per-format HTTP handlers.

use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use futures::StreamExt;

use artifact_registry::{Engine, Format, Storage};
use commons::buffer::HashedBuffer;
use commons::{Error, Result};

use crate::auth;

/// Shared application state.
pub struct AppState {
    pub engine: Arc<Engine>,
}

impl AppState {
    pub fn credentials(&self, req: &HttpRequest) -> Option<oci::Credentials> {
        auth::credentials(req, &self.engine.config().key)
    }

    /// Construct the request-scoped storage handle for `repo`.
    pub async fn storage<F: Format>(
        &self,
        req: &HttpRequest,
        repo: &str,
    ) -> Result<Storage<F>> {
        self.engine
            .clone()
            .storage(self.credentials(req), repo)
            .await
    }
}

/// Split a greedy `tail` path segment into a repository name and the
/// `trailing` fixed segments the route consumes.
///
/// In single-repository mode the repository part may be absent entirely.
pub fn split_repo<'a>(
    engine: &Engine,
    tail: &'a str,
    trailing: usize,
) -> Result<(String, Vec<&'a str>)> {
    let segments: Vec<&str> = tail.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < trailing {
        return Err(Error::BadRequest(format!("unexpected path {:?}", tail)));
    }
    let (repo, rest) = segments.split_at(segments.len() - trailing);
    let repo = if repo.is_empty() {
        engine.repo_name(None)?
    } else {
        engine.repo_name(Some(&repo.join("/")))?
    };
    Ok((repo, rest.to_vec()))
}

/// Read the upload body into a hashed buffer, spooling under `dir`.
///
/// Bodies arrive either raw or as the `file` field of a multipart form.
pub async fn read_upload(
    req: &HttpRequest,
    mut payload: web::Payload,
    dir: &Path,
) -> Result<HashedBuffer> {
    let mut buf = HashedBuffer::in_dir(dir);

    let is_multipart = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("multipart/form-data"))
        .unwrap_or(false);

    if is_multipart {
        let mut multipart = actix_multipart::Multipart::new(req.headers(), payload);
        let mut found = false;
        while let Some(field) = multipart.next().await {
            let mut field = field.map_err(|e| Error::BadRequest(e.to_string()))?;
            let is_file = field.name() == "file";
            while let Some(chunk) = field.next().await {
                let chunk = chunk.map_err(|e| Error::BadRequest(e.to_string()))?;
                if is_file {
                    buf.write_all(&chunk)
                        .map_err(|e| Error::Internal(e.into()))?;
                }
            }
            if is_file {
                found = true;
                break;
            }
        }
        if !found {
            return Err(Error::BadRequest("missing 'file' form field".into()));
        }
    } else {
        while let Some(chunk) = payload.next().await {
            let chunk = chunk.map_err(|e| Error::BadRequest(e.to_string()))?;
            buf.write_all(&chunk)
                .map_err(|e| Error::Internal(e.into()))?;
        }
    }

    buf.seek(SeekFrom::Start(0))
        .map_err(|e| Error::Internal(e.into()))?;
    Ok(buf)
}

/// Stream a stored artifact to the client with download headers.
pub async fn serve_file<F: Format>(
    storage: &Storage<F>,
    path: &str,
) -> Result<HttpResponse> {
    log::info!("serving {}", path);
    let (info, stream) = storage.open(path).await?;

    let name = path.rsplit('/').next().unwrap_or(path);
    let mut resp = HttpResponse::Ok();
    if let Some(ctype) = content_type(path) {
        resp.insert_header((header::CONTENT_TYPE, ctype));
    }
    resp.insert_header((
        header::CONTENT_DISPOSITION,
        format!("attachment; filename={}", name),
    ));
    resp.insert_header((header::ACCESS_CONTROL_EXPOSE_HEADERS, "Content-Disposition"));
    resp.no_chunking(info.size);
    Ok(resp.streaming(stream))
}

/// Content type by file extension, mirroring what package clients expect.
fn content_type(path: &str) -> Option<&'static str> {
    let ext = path.rsplit('.').next()?;
    match ext {
        "gz" | "tgz" | "apk" => Some("application/gzip"),
        "xz" => Some("application/x-xz"),
        "deb" => Some("application/vnd.debian.binary-package"),
        "rpm" => Some("application/x-rpm"),
        "xml" => Some("text/xml; charset=utf-8"),
        "yaml" | "yml" => Some("application/yaml"),
        "key" | "asc" | "pub" => Some("application/pgp-keys"),
        "json" => Some("application/json"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use artifact_registry::EngineConfig;
    use pretty_assertions::assert_eq;

    fn engine(pinned: Option<&str>) -> Arc<Engine> {
        let mut config = EngineConfig::new("registry.example.com", [0u8; 32]);
        config.repo = pinned.map(String::from);
        Engine::new(config)
    }

    #[tokio::test]
    async fn split_repo_with_explicit_repository() {
        let engine = engine(None);
        let (repo, rest) = split_repo(&engine, "my/repo/v3.19/main", 2).unwrap();
        assert_eq!(repo, "my/repo");
        assert_eq!(rest, vec!["v3.19", "main"]);

        let (repo, rest) = split_repo(&engine, "my-repo", 0).unwrap();
        assert_eq!(repo, "my-repo");
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn split_repo_in_single_repository_mode() {
        let engine = engine(Some("pinned"));
        let (repo, rest) = split_repo(&engine, "v3.19/main", 2).unwrap();
        assert_eq!(repo, "pinned");
        assert_eq!(rest, vec!["v3.19", "main"]);
    }

    #[tokio::test]
    async fn split_repo_requires_a_name() {
        let engine = engine(None);
        // No pinned repo and nothing left over for the repo name.
        assert!(split_repo(&engine, "v3.19/main", 2).is_err());
        assert!(split_repo(&engine, "x", 2).is_err());
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type("APKINDEX.tar.gz"), Some("application/gzip"));
        assert_eq!(
            content_type("pool/s/m/tool_1.0_amd64.deb"),
            Some("application/vnd.debian.binary-package")
        );
        assert_eq!(content_type("repomd.xml"), Some("text/xml; charset=utf-8"));
        assert_eq!(content_type("index.yaml"), Some("application/yaml"));
        assert_eq!(content_type("no-extension"), None);
    }
}
