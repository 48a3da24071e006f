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

//! Helm repository surface.

use actix_web::{web, HttpRequest, HttpResponse};

use artifact_registry::packages::helm::{Helm, Package};
use commons::Result;

use crate::handlers::{self, AppState};

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/{tail:.+}/push", web::put().to(push));
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

    let storage = state.storage::<Helm>(&req, &repo).await?;
    storage.init().await?;
    let mut buf = handlers::read_upload(&req, payload, storage.scratch_dir()).await?;
    let pkg = Package::parse(&mut buf)?;
    log::info!("uploading artifact {}", pkg.file_path);
    storage.write(pkg, buf).await?;
    Ok(HttpResponse::Created().finish())
}

async fn pull(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse> {
    let (tail, filename) = path.into_inner();
    let (repo, _) = handlers::split_repo(&state.engine, &tail, 0)?;
    let storage = state.storage::<Helm>(&req, &repo).await?;
    handlers::serve_file(&storage, &filename).await
}

async fn delete(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse> {
    let (tail, filename) = path.into_inner();
    let (repo, _) = handlers::split_repo(&state.engine, &tail, 0)?;
    let storage = state.storage::<Helm>(&req, &repo).await?;
    storage.delete(&filename).await?;
    Ok(HttpResponse::Ok().finish())
}
