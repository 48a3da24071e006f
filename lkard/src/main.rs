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

//! The artifact registry server.

mod api;
mod auth;
mod config;
mod formats;
mod handlers;
mod server;
mod templates;

use structopt::StructOpt;

#[actix_web::main]
async fn main() {
    let options = config::CliOptions::from_args();

    let settings = match config::AppSettings::assemble(options) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("invalid configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    env_logger::Builder::from_default_env()
        .filter(None, settings.verbosity)
        .init();
    log::debug!("application settings:\n{:#?}", settings);

    if let Err(e) = server::run(settings).await {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}
