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

//! HTTP server assembly.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use actix_web::{middleware::Logger, web, App, HttpResponse, HttpServer};

use artifact_registry::Engine;
use commons::prelude_errors::*;

use crate::api;
use crate::config::AppSettings;
use crate::formats;
use crate::handlers::AppState;

pub async fn run(settings: AppSettings) -> Fallible<()> {
    log::info!(
        "initializing artifact registry using backend {}",
        settings.engine.backend
    );
    if settings.disable_ui {
        log::debug!("web ui is disabled");
    }

    let engine = Engine::new(settings.engine.clone());
    let domain = settings.domain.clone();
    let pinned = settings.engine.repo.is_some();

    let state = web::Data::new(AppState { engine });

    let server = HttpServer::new(move || {
        let domain = domain.clone();
        App::new()
            .app_data(state.clone())
            .wrap(Logger::new(
                "%a \"%r\" %s %b %Dms \"%{User-Agent}i\"",
            ))
            .route("/_/health", web::get().to(health))
            .configure(|cfg| api::routes(cfg, pinned))
            .configure(move |cfg| formats::routes(cfg, domain.as_deref()))
    });

    log::info!("starting server at {}", settings.address);
    let server = match &settings.tls {
        Some((cert, key)) => {
            let tls = rustls_config(cert, key)?;
            server.bind_rustls_021(&settings.address, tls)?
        }
        None => server.bind(&settings.address)?,
    };
    server.run().await.context("server terminated")?;
    Ok(())
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().finish()
}


fn rustls_config(cert: &Path, key: &Path) -> Fallible<rustls::ServerConfig> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(
        File::open(cert).with_context(|| format!("could not open {}", cert.display()))?,
    ))?
    .into_iter()
    .map(rustls::Certificate)
    .collect();

    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut BufReader::new(
        File::open(key).with_context(|| format!("could not open {}", key.display()))?,
    ))?;
    let key = keys
        .pop()
        .ok_or_else(|| format_err!("no private key found in {}", key.display()))?;

    rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, rustls::PrivateKey(key))
        .context("invalid tls certificate or key")
}
