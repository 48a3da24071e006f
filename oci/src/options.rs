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

use std::fmt;
use std::sync::Arc;

use sha2::{Digest as _, Sha256};

use commons::cache::Cache;
use commons::Result;

use crate::client::AuthClient;

const DEFAULT_USER_AGENT: &str = concat!("lk-artifact-registry/", env!("CARGO_PKG_VERSION"));

/// Basic credentials for a registry host.
///
/// This is also the per-request auth capability handed down from the HTTP
/// edge: handlers never see more than `(username, password)`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new<U: Into<String>, P: Into<String>>(username: U, password: P) -> Self {
        Credentials {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Connection options for one registry host.
#[derive(Clone, Debug, Default)]
pub struct ClientOptions {
    /// Use `http://` instead of `https://`.
    pub plain_http: bool,
    /// Skip TLS certificate verification.
    pub insecure: bool,
    /// Additional trust roots, PEM encoded.
    pub client_ca: Option<Vec<u8>>,
    /// Static credentials; when unset, the request-scoped credentials are
    /// used instead.
    pub basic_auth: Option<Credentials>,
    /// User agent set on every request; a default is used when empty.
    pub user_agent: Option<String>,
    /// Wire-level request/response logging.
    pub debug: bool,
}

impl ClientOptions {
    pub fn user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT)
    }
}

/// Credential-keyed cache of authenticated clients.
///
/// A hash of `(user, pass, host)` keys each entry so the token handshake is
/// amortized across requests from the same principal.
pub struct ClientCache {
    clients: Cache<Arc<AuthClient>>,
}

impl ClientCache {
    /// Must be called from within a Tokio runtime.
    pub fn new() -> Self {
        ClientCache {
            clients: Cache::new(),
        }
    }

    pub fn client(
        &self,
        host: &str,
        options: &ClientOptions,
        credentials: Option<&Credentials>,
    ) -> Result<Arc<AuthClient>> {
        let credentials = options.basic_auth.as_ref().or(credentials);
        let key = cache_key(host, credentials);
        if let Some(client) = self.clients.get(&key) {
            // Refresh the entry, matching the manifest cache semantics.
            self.clients.set(key, client.clone(), None);
            return Ok(client);
        }
        let client = Arc::new(AuthClient::new(host, options, credentials.cloned())?);
        self.clients.set(key, client.clone(), None);
        Ok(client)
    }
}

fn cache_key(host: &str, credentials: Option<&Credentials>) -> String {
    let mut h = Sha256::new();
    if let Some(c) = credentials {
        h.update(c.username.as_bytes());
        h.update(c.password.as_bytes());
    }
    h.update(host.as_bytes());
    hex::encode(h.finalize())
}
