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

//! Per-format HTTP surfaces.
//!
//! Each format is mounted under `/<format>/…` and, when a domain is
//! configured, additionally under the `<format>.<domain>` virtual host.

pub mod apk;
pub mod deb;
pub mod helm;
pub mod rpm;

use actix_web::{guard, web};

/// Mount every format surface.
pub fn routes(cfg: &mut web::ServiceConfig, domain: Option<&str>) {
    cfg.service(web::scope("/apk").configure(apk::routes));
    cfg.service(web::scope("/deb").configure(deb::routes));
    cfg.service(web::scope("/rpm").configure(rpm::routes));
    cfg.service(web::scope("/helm").configure(helm::routes));

    if let Some(domain) = domain {
        cfg.service(
            web::scope("")
                .guard(guard::Host(format!("apk.{}", domain)))
                .configure(apk::routes),
        );
        cfg.service(
            web::scope("")
                .guard(guard::Host(format!("deb.{}", domain)))
                .configure(deb::routes),
        );
        cfg.service(
            web::scope("")
                .guard(guard::Host(format!("rpm.{}", domain)))
                .configure(rpm::routes),
        );
        cfg.service(
            web::scope("")
                .guard(guard::Host(format!("helm.{}", domain)))
                .configure(helm::routes),
        );
    }
}
