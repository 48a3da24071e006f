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

//! Auxiliary surface: repository listing, package listing and auth probes.

use actix_web::{web, HttpRequest, HttpResponse};
use serde_derive::Serialize;

use artifact_registry::packages::{apk::Apk, deb::Deb, helm::Helm, rpm::Rpm, FORMATS};
use artifact_registry::Format;
use commons::{Error, Result};

use crate::auth;
use crate::handlers::AppState;

pub fn routes(cfg: &mut web::ServiceConfig, pinned: bool) {
    cfg.service(
        web::resource("/_auth/login")
            .route(web::get().to(login))
            .route(web::post().to(login)),
    )
    .service(
        web::resource("/_auth/logout")
            .route(web::get().to(logout))
            .route(web::post().to(logout)),
    )
    .route("/_auth/credentials", web::get().to(credentials));
    if !pinned {
        cfg.service(
            web::resource("/_auth/{repo:.+}/login")
                .route(web::get().to(login_repo))
                .route(web::post().to(login_repo)),
        );
        cfg.route("/_repositories", web::get().to(list_repositories))
            .route("/_repositories/{repo:.+}", web::get().to(repository_stats))
            .route("/_packages/{type}/{repo:.+}", web::get().to(packages));
    } else {
        cfg.route("/_repositories", web::get().to(repository_stats_pinned))
            .route("/_packages/{type}", web::get().to(packages_pinned));
    }
}

async fn login(state: web::Data<AppState>, req: HttpRequest) -> Result<HttpResponse> {
    probe_and_save(&state, &req, None).await
}

async fn login_repo(
    state: web::Data<AppState>,
    req: HttpRequest,
    repo: web::Path<String>,
) -> Result<HttpResponse> {
    probe_and_save(&state, &req, Some(repo.as_str())).await
}

async fn probe_and_save(
    state: &AppState,
    req: &HttpRequest,
    repo: Option<&str>,
) -> Result<HttpResponse> {
    let creds = state.credentials(req);
    let repo = repo
        .map(String::from)
        .or_else(|| state.engine.config().repo.clone());
    state
        .engine
        .login(creds.as_ref(), repo.as_deref(), None)
        .await?;

    let mut resp = HttpResponse::Ok();
    if let Some(creds) = creds {
        let cookie = auth::session_cookie(&state.engine.config().key, &creds)?;
        resp.cookie(cookie);
    }
    Ok(resp.finish())
}

async fn logout() -> HttpResponse {
    let mut resp = HttpResponse::Ok();
    resp.cookie(auth::clear_cookie());
    resp.finish()
}

#[derive(Serialize)]
struct CredentialsResponse {
    user: String,
    password: String,
}

async fn credentials(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    let creds = state.credentials(&req);
    let (user, password) = creds
        .map(|c| (c.username, c.password))
        .unwrap_or_default();
    HttpResponse::Ok().json(CredentialsResponse { user, password })
}

async fn list_repositories(
    state: web::Data<AppState>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let creds = state.credentials(&req);
    let out = state
        .engine
        .list_repositories(creds.as_ref(), None)
        .await?;
    Ok(HttpResponse::Ok().json(out))
}

async fn repository_stats(
    state: web::Data<AppState>,
    req: HttpRequest,
    repo: web::Path<String>,
) -> Result<HttpResponse> {
    let creds = state.credentials(&req);
    let out = state
        .engine
        .repository_stats(creds.as_ref(), &repo, None)
        .await?;
    Ok(HttpResponse::Ok().json(out))
}

async fn repository_stats_pinned(
    state: web::Data<AppState>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let name = state.engine.repo_name(None)?;
    let creds = state.credentials(&req);
    let out = state
        .engine
        .repository_stats(creds.as_ref(), &name, None)
        .await?;
    Ok(HttpResponse::Ok().json(out))
}

async fn packages(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse> {
    let (format, repo) = path.into_inner();
    packages_of(&state, &req, &format, &repo).await
}

async fn packages_pinned(
    state: web::Data<AppState>,
    req: HttpRequest,
    format: web::Path<String>,
) -> Result<HttpResponse> {
    let repo = state.engine.repo_name(None)?;
    packages_of(&state, &req, &format, &repo).await
}

/// The decoded package metadata of one repository, as pushed.
async fn packages_of(
    state: &AppState,
    req: &HttpRequest,
    format: &str,
    repo: &str,
) -> Result<HttpResponse> {
    match format {
        "apk" => artifacts_json::<Apk>(state, req, repo).await,
        "deb" => artifacts_json::<Deb>(state, req, repo).await,
        "rpm" => artifacts_json::<Rpm>(state, req, repo).await,
        "helm" => artifacts_json::<Helm>(state, req, repo).await,
        other => Err(Error::BadRequest(format!(
            "unknown package type {:?}, expected one of {:?}",
            other, FORMATS
        ))),
    }
}

async fn artifacts_json<F: Format>(
    state: &AppState,
    req: &HttpRequest,
    repo: &str,
) -> Result<HttpResponse> {
    let storage = state.storage::<F>(req, repo).await?;
    let artifacts = storage.artifacts().await?;
    Ok(HttpResponse::Ok().json(artifacts))
}
