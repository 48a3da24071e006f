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

use std::collections::HashMap;

use parking_lot::Mutex;
use reqwest::StatusCode;
use serde_derive::Deserialize;

use commons::{Error, Result};

use crate::options::{ClientOptions, Credentials};

/// One registry host with credential handling.
///
/// Distribution endpoints answer `401` with a `WWW-Authenticate` Bearer
/// challenge; the client fetches a token for the requested scope, caches it,
/// and retries. Hosts without a token service fall back to basic auth.
pub struct AuthClient {
    http: reqwest::Client,
    host: String,
    scheme: &'static str,
    credentials: Option<Credentials>,
    tokens: Mutex<HashMap<String, String>>,
    debug: bool,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Debug, PartialEq)]
struct Challenge {
    realm: String,
    service: Option<String>,
}

impl AuthClient {
    pub fn new(
        host: &str,
        options: &ClientOptions,
        credentials: Option<Credentials>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(options.user_agent());
        if options.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(pem) = &options.client_ca {
            let cert = reqwest::Certificate::from_pem(pem).map_err(http_err)?;
            builder = builder.add_root_certificate(cert);
        }
        Ok(AuthClient {
            http: builder.build().map_err(http_err)?,
            host: host.to_string(),
            scheme: if options.plain_http { "http" } else { "https" },
            credentials,
            tokens: Mutex::new(HashMap::new()),
            debug: options.debug,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}/v2", self.scheme, self.host)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    /// Build a request on this client's connection pool without sending it.
    pub fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.http.request(method, url)
    }

    /// Send a request, answering a Bearer challenge once.
    ///
    /// `build` must produce a repeatable request; bodies that cannot be
    /// replayed go through [`AuthClient::execute_once`] after an earlier
    /// call on the same scope has cached the token.
    pub async fn execute<F>(&self, scope: &str, build: F) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let resp = self.send(scope, build(&self.http)).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }
        let challenge = match challenge_from(&resp) {
            Some(c) => c,
            None => return Ok(resp),
        };
        self.fetch_token(scope, &challenge).await?;
        self.send(scope, build(&self.http)).await
    }

    /// Send a request exactly once, with whatever credentials are cached.
    pub async fn execute_once(
        &self,
        scope: &str,
        req: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        self.send(scope, req).await
    }

    async fn send(&self, scope: &str, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let token = self.tokens.lock().get(scope).cloned();
        let req = match token {
            Some(token) => req.bearer_auth(token),
            None => match &self.credentials {
                Some(c) => req.basic_auth(&c.username, Some(&c.password)),
                None => req,
            },
        };
        let resp = req.send().await.map_err(http_err)?;
        if self.debug {
            log::debug!(
                "{} {} -> {}",
                resp.url().as_str(),
                scope,
                resp.status().as_u16()
            );
        }
        Ok(resp)
    }

    async fn fetch_token(&self, scope: &str, challenge: &Challenge) -> Result<()> {
        let mut req = self.http.get(&challenge.realm).query(&[("scope", scope)]);
        if let Some(service) = &challenge.service {
            req = req.query(&[("service", service)]);
        }
        if let Some(c) = &self.credentials {
            req = req.basic_auth(&c.username, Some(&c.password));
        }
        let resp = req.send().await.map_err(http_err)?;
        if !resp.status().is_success() {
            return Err(Error::Unauthorized(format!(
                "token service answered {} for scope {}",
                resp.status(),
                scope
            )));
        }
        let token: TokenResponse = resp.json().await.map_err(http_err)?;
        let token = token
            .token
            .or(token.access_token)
            .ok_or_else(|| Error::Unauthorized(format!("empty token for scope {}", scope)))?;
        self.tokens.lock().insert(scope.to_string(), token);
        Ok(())
    }
}

pub(crate) fn http_err(e: reqwest::Error) -> Error {
    Error::Internal(e.into())
}

/// Map a non-success registry response to a typed error, preserving the last
/// upstream error string.
pub(crate) async fn error_for(what: &str, resp: reqwest::Response) -> Error {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    match status {
        StatusCode::NOT_FOUND => Error::not_found(what),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::Unauthorized(last_error_message(&body).unwrap_or_else(|| what.to_string()))
        }
        _ => Error::Upstream {
            status: status.as_u16(),
            message: last_error_message(&body)
                .unwrap_or_else(|| format!("{}: {}", what, body.trim())),
        },
    }
}

fn last_error_message(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct Errors {
        errors: Vec<ErrorEntry>,
    }
    #[derive(Deserialize)]
    struct ErrorEntry {
        #[serde(default)]
        message: String,
    }
    let parsed: Errors = serde_json::from_str(body).ok()?;
    parsed.errors.last().map(|e| e.message.clone())
}

fn challenge_from(resp: &reqwest::Response) -> Option<Challenge> {
    let header = resp
        .headers()
        .get(reqwest::header::WWW_AUTHENTICATE)?
        .to_str()
        .ok()?;
    parse_challenge(header)
}

fn parse_challenge(header: &str) -> Option<Challenge> {
    let rest = header.strip_prefix("Bearer ")?;
    let mut realm = None;
    let mut service = None;
    for part in rest.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        let value = value.trim_matches('"');
        match key {
            "realm" => realm = Some(value.to_string()),
            "service" => service = Some(value.to_string()),
            _ => {}
        }
    }
    Some(Challenge {
        realm: realm?,
        service,
    })
}
