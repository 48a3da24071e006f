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

//! Alpine repository surface.
//!
//! Paths follow the apk layout: `<repo>/<branch>/<apk-repo>/<arch>/<file>`.

use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};

use artifact_registry::crypt::rsa;
use artifact_registry::packages::apk::{Apk, Package};
use artifact_registry::Format;
use commons::{Error, Result};

use crate::handlers::{self, AppState};
use crate::templates;

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/{tail:.+}/push", web::put().to(push));
    cfg.route("/{tail:.+}/key", web::get().to(key));
    cfg.route("/{tail:.+}/setup", web::get().to(setup));
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
    let (repo, parts) = handlers::split_repo(&state.engine, &tail, 2)?;
    let (branch, apk_repo) = (parts[0], parts[1]);

    let storage = state.storage::<Apk>(&req, &repo).await?;
    storage.init().await?;
    let mut buf = handlers::read_upload(&req, payload, storage.scratch_dir()).await?;
    let pkg = Package::parse(&mut buf, branch, apk_repo)?;
    log::info!("uploading artifact {}", pkg.file_path);
    storage.write(pkg, buf).await?;
    Ok(HttpResponse::Created().finish())
}

async fn pull(
    state: web::Data<AppState>,
    req: HttpRequest,
    tail: web::Path<String>,
) -> Result<HttpResponse> {
    let (repo, parts) = handlers::split_repo(&state.engine, &tail, 4)?;
    let storage = state.storage::<Apk>(&req, &repo).await?;
    handlers::serve_file(&storage, &parts.join("/")).await
}

async fn delete(
    state: web::Data<AppState>,
    req: HttpRequest,
    tail: web::Path<String>,
) -> Result<HttpResponse> {
    let (repo, parts) = handlers::split_repo(&state.engine, &tail, 4)?;
    let storage = state.storage::<Apk>(&req, &repo).await?;
    storage.delete(&parts.join("/")).await?;
    Ok(HttpResponse::Ok().finish())
}

/// Serve the PKIX public key derived from the repository private key, named
/// after its fingerprint the way apk expects.
async fn key(
    state: web::Data<AppState>,
    req: HttpRequest,
    tail: web::Path<String>,
) -> Result<HttpResponse> {
    let (repo, _) = handlers::split_repo(&state.engine, &tail, 2)?;
    let storage = state.storage::<Apk>(&req, &repo).await?;
    let private = storage
        .key()
        .ok_or_else(|| Error::not_found("repository key"))?;
    let (public, fingerprint) = rsa::public_key_and_fingerprint(&private)?;
    Ok(HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "application/x-pem-file"))
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=lkar@{}.rsa.pub", hex::encode(fingerprint)),
        ))
        .insert_header((header::ACCESS_CONTROL_EXPOSE_HEADERS, "Content-Disposition"))
        .body(public))
}

async fn setup(
    state: web::Data<AppState>,
    req: HttpRequest,
    tail: web::Path<String>,
) -> Result<HttpResponse> {
    let (repo, parts) = handlers::split_repo(&state.engine, &tail, 2)?;
    let (branch, apk_repo) = (parts[0], parts[1]);

    let storage = state.storage::<Apk>(&req, &repo).await?;
    storage.stat(Apk::PUBLIC_KEY_NAME).await?;

    let credentials = state.credentials(&req);
    let (user, password) = credentials
        .as_ref()
        .map(|c| (c.username.as_str(), c.password.as_str()))
        .unwrap_or(("", ""));
    let suffix = format!("/{}/{}/setup", branch, apk_repo);
    let script = templates::render(
        templates::APK_SETUP,
        &[
            ("user", user),
            ("password", password),
            ("scheme", &templates::scheme(&req)),
            ("host", req.connection_info().host()),
            ("path", req.path().trim_end_matches(suffix.as_str())),
            ("branch", branch),
            ("repository", apk_repo),
        ],
    );
    Ok(HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/x-shellscript"))
        .body(script))
}
