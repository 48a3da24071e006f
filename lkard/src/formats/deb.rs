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

//! Debian repository surface.
//!
//! Package files live under `pool/…`, repository metadata under `dists/…`;
//! everything before those markers is the repository name.

use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};

use artifact_registry::packages::deb::{Deb, Package};
use artifact_registry::Format;
use commons::{Error, Result};

use crate::handlers::{self, AppState};
use crate::templates;

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/{tail:.+}/push", web::put().to(push));
    cfg.route("/{tail:.+}/setup", web::get().to(setup));
    cfg.route("/{tail:.+}/repository.key", web::get().to(key));
    cfg.service(
        web::resource("/{tail:.+}")
            .route(web::get().to(pull))
            .route(web::delete().to(delete)),
    );
}

async fn push(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Payload,
    tail: web::Path<String>,
) -> Result<HttpResponse> {
    // Uploads address the pool: `<repo>/pool/<distribution>/<component>/push`.
    let (repo, parts) = handlers::split_repo(&state.engine, &tail, 3)?;
    if parts[0] != "pool" {
        return Err(Error::BadRequest(format!(
            "unexpected upload path {:?}",
            tail.as_str()
        )));
    }
    let (distribution, component) = (parts[1], parts[2]);

    let storage = state.storage::<Deb>(&req, &repo).await?;
    storage.init().await?;
    let mut buf = handlers::read_upload(&req, payload, storage.scratch_dir()).await?;
    let pkg = Package::parse(&mut buf, distribution, component)?;
    log::info!("uploading artifact {}", pkg.file_path);
    storage.write(pkg, buf).await?;
    Ok(HttpResponse::Created().finish())
}

/// Split `<repo…>/pool/…` or `<repo…>/dists/…` into the repository name and
/// the stored file path.
fn split_file_path<'a>(
    engine: &artifact_registry::Engine,
    tail: &'a str,
) -> Result<(String, String)> {
    let segments: Vec<&'a str> = tail.split('/').filter(|s| !s.is_empty()).collect();
    let marker = segments
        .iter()
        .position(|s| *s == "pool" || *s == "dists")
        .ok_or_else(|| Error::not_found(tail))?;
    let repo = if marker == 0 {
        engine.repo_name(None)?
    } else {
        engine.repo_name(Some(&segments[..marker].join("/")))?
    };
    Ok((repo, segments[marker..].join("/")))
}

async fn pull(
    state: web::Data<AppState>,
    req: HttpRequest,
    tail: web::Path<String>,
) -> Result<HttpResponse> {
    let (repo, path) = split_file_path(&state.engine, &tail)?;
    let storage = state.storage::<Deb>(&req, &repo).await?;
    handlers::serve_file(&storage, &path).await
}

async fn delete(
    state: web::Data<AppState>,
    req: HttpRequest,
    tail: web::Path<String>,
) -> Result<HttpResponse> {
    let (repo, path) = split_file_path(&state.engine, &tail)?;
    let storage = state.storage::<Deb>(&req, &repo).await?;
    storage.delete(&path).await?;
    Ok(HttpResponse::Ok().finish())
}

async fn key(
    state: web::Data<AppState>,
    req: HttpRequest,
    tail: web::Path<String>,
) -> Result<HttpResponse> {
    let (repo, _) = handlers::split_repo(&state.engine, &tail, 0)?;
    let storage = state.storage::<Deb>(&req, &repo).await?;
    let (info, stream) = storage.open(Deb::PUBLIC_KEY_NAME).await?;
    let mut resp = HttpResponse::Ok();
    resp.insert_header((header::CONTENT_TYPE, "text/plain; charset=utf-8"));
    resp.no_chunking(info.size);
    Ok(resp.streaming(stream))
}

async fn setup(
    state: web::Data<AppState>,
    req: HttpRequest,
    tail: web::Path<String>,
) -> Result<HttpResponse> {
    let (repo, parts) = handlers::split_repo(&state.engine, &tail, 2)?;
    let (distribution, component) = (parts[0], parts[1]);

    let storage = state.storage::<Deb>(&req, &repo).await?;
    storage.stat(Deb::PUBLIC_KEY_NAME).await?;

    let credentials = state.credentials(&req);
    let (user, password) = credentials
        .as_ref()
        .map(|c| (c.username.as_str(), c.password.as_str()))
        .unwrap_or(("", ""));
    let suffix = format!("/{}/{}/setup", distribution, component);
    let host = req.connection_info().host().to_string();
    let script = templates::render(
        templates::DEB_SETUP,
        &[
            ("user", user),
            ("password", password),
            ("scheme", &templates::scheme(&req)),
            ("host", &host),
            ("path", req.path().trim_end_matches(suffix.as_str())),
            ("distribution", distribution),
            ("component", component),
            ("name", &templates::local_name(&host, &repo)),
        ],
    );
    Ok(HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/x-shellscript"))
        .body(script))
}
