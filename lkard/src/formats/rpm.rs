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

//! RPM repository surface.
//!
//! Metadata layers carry bare filenames; the `repodata/` URL prefix is
//! route-level only, matching how `repomd.xml` references them.

use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};

use artifact_registry::packages::rpm::{Package, Rpm};
use artifact_registry::Format;
use commons::{Error, Result};

use crate::handlers::{self, AppState};
use crate::templates;

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/{tail:.+}.repo", web::get().to(repo_definition));
    cfg.route("/{tail:.+}/repository.key", web::get().to(key));
    cfg.route("/{tail:.+}/push", web::put().to(push));
    cfg.route("/{tail:.+}/setup", web::get().to(setup));
    cfg.route("/{tail:.+}/repodata/{filename}", web::get().to(repodata));
    cfg.service(
        web::resource("/{tail:.+}/{filename}")
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
    let (repo, _) = handlers::split_repo(&state.engine, &tail, 0)?;

    let storage = state.storage::<Rpm>(&req, &repo).await?;
    // The parser needs the repository key to re-sign the package.
    storage.init().await?;
    let private = storage
        .key()
        .ok_or_else(|| Error::Internal(anyhow::anyhow!("repository key is not initialized")))?;
    let mut buf = handlers::read_upload(&req, payload, storage.scratch_dir()).await?;
    let (pkg, signed) = Package::parse(&mut buf, &private)?;
    log::info!("uploading artifact {}", pkg.file_path);
    storage.write(pkg, signed).await?;
    Ok(HttpResponse::Created().finish())
}

async fn repodata(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse> {
    let (tail, filename) = path.into_inner();
    let (repo, _) = handlers::split_repo(&state.engine, &tail, 0)?;
    let storage = state.storage::<Rpm>(&req, &repo).await?;
    handlers::serve_file(&storage, &filename).await
}

async fn pull(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse> {
    let (tail, filename) = path.into_inner();
    let (repo, _) = handlers::split_repo(&state.engine, &tail, 0)?;
    let storage = state.storage::<Rpm>(&req, &repo).await?;
    handlers::serve_file(&storage, &filename).await
}

async fn delete(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse> {
    let (tail, filename) = path.into_inner();
    let (repo, _) = handlers::split_repo(&state.engine, &tail, 0)?;
    let storage = state.storage::<Rpm>(&req, &repo).await?;
    storage.delete(&filename).await?;
    Ok(HttpResponse::Ok().finish())
}

async fn key(
    state: web::Data<AppState>,
    req: HttpRequest,
    tail: web::Path<String>,
) -> Result<HttpResponse> {
    let (repo, _) = handlers::split_repo(&state.engine, &tail, 0)?;
    let storage = state.storage::<Rpm>(&req, &repo).await?;
    let (info, stream) = storage.open(Rpm::PUBLIC_KEY_NAME).await?;
    let mut resp = HttpResponse::Ok();
    resp.insert_header((header::CONTENT_TYPE, "text/plain; charset=utf-8"));
    resp.no_chunking(info.size);
    Ok(resp.streaming(stream))
}

/// Render the yum/dnf repository definition, with inline credentials when
/// the caller supplied some.
async fn repo_definition(
    state: web::Data<AppState>,
    req: HttpRequest,
    tail: web::Path<String>,
) -> Result<HttpResponse> {
    let (repo, _) = handlers::split_repo(&state.engine, &tail, 0)?;

    let mut host = req.connection_info().host().trim_end_matches('/').to_string();
    if let Some(c) = state.credentials(&req) {
        host = format!("{}:{}@{}", c.username, c.password, host);
    }
    let base = req.path().trim_end_matches(".repo").trim_start_matches('/');
    let url = format!("{}://{}/{}", templates::scheme(&req), host, base);

    let definition = templates::render(
        templates::RPM_REPO_DEFINITION,
        &[
            ("name", &repo.replace('/', "-")),
            ("url", &url),
            ("key", Rpm::PUBLIC_KEY_NAME),
        ],
    );
    Ok(HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/plain; charset=utf-8"))
        .body(definition))
}

async fn setup(
    state: web::Data<AppState>,
    req: HttpRequest,
    tail: web::Path<String>,
) -> Result<HttpResponse> {
    let (repo, _) = handlers::split_repo(&state.engine, &tail, 0)?;

    let storage = state.storage::<Rpm>(&req, &repo).await?;
    storage.stat(Rpm::PUBLIC_KEY_NAME).await?;

    let credentials = state.credentials(&req);
    let (user, password) = credentials
        .as_ref()
        .map(|c| (c.username.as_str(), c.password.as_str()))
        .unwrap_or(("", ""));
    let host = req.connection_info().host().to_string();
    let script = templates::render(
        templates::RPM_SETUP,
        &[
            ("user", user),
            ("password", password),
            ("scheme", &templates::scheme(&req)),
            ("host", &host),
            ("path", req.path().trim_end_matches("/setup")),
            ("name", &templates::local_name(&host, &repo)),
        ],
    );
    Ok(HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/x-shellscript"))
        .body(script))
}
