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

use std::sync::Arc;

use serde_derive::Deserialize;

use commons::Result;

use crate::client::{error_for, http_err, AuthClient};
use crate::repository::Repository;

const CATALOG_PAGE: usize = 100;

/// A registry endpoint, optionally backed by a read-through proxy.
pub struct Registry {
    client: Arc<AuthClient>,
    proxy: Option<Arc<AuthClient>>,
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    repositories: Vec<String>,
}

impl Registry {
    pub fn new(client: Arc<AuthClient>, proxy: Option<Arc<AuthClient>>) -> Self {
        Registry { client, proxy }
    }

    pub fn host(&self) -> &str {
        self.client.host()
    }

    /// Walk the repository catalog, starting after `last`.
    ///
    /// `f` is called once per page and returns `false` to stop early.
    pub async fn repositories<F>(&self, last: Option<&str>, mut f: F) -> Result<()>
    where
        F: FnMut(Vec<String>) -> Result<bool>,
    {
        let scope = "registry:catalog:*";
        let mut last = last.map(String::from);
        loop {
            let url = self.client.url("/_catalog");
            let page_last = last.clone();
            let resp = self
                .client
                .execute(scope, move |c| {
                    let mut req = c.get(&url).query(&[("n", CATALOG_PAGE.to_string())]);
                    if let Some(l) = &page_last {
                        req = req.query(&[("last", l)]);
                    }
                    req
                })
                .await?;
            if !resp.status().is_success() {
                return Err(error_for("catalog", resp).await);
            }
            let page: CatalogResponse = resp.json().await.map_err(http_err)?;
            let full = page.repositories.len() == CATALOG_PAGE;
            last = page.repositories.last().cloned();
            if page.repositories.is_empty() {
                return Ok(());
            }
            if !f(page.repositories)? || !full {
                return Ok(());
            }
        }
    }

    /// A handle on one repository of this registry.
    pub fn repository(&self, name: &str) -> Repository {
        Repository::new(self.client.clone(), self.proxy.clone(), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ClientOptions;

    fn plain_client(server: &mockito::Server) -> Arc<AuthClient> {
        Arc::new(
            AuthClient::new(
                &server.host_with_port(),
                &ClientOptions {
                    plain_http: true,
                    ..Default::default()
                },
                None,
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn catalog_single_page() {
        let mut server = mockito::Server::new_async().await;
        let catalog = server
            .mock("GET", "/v2/_catalog")
            .match_query(mockito::Matcher::UrlEncoded("n".into(), "100".into()))
            .with_body(r#"{"repositories":["alpha","beta"]}"#)
            .create_async()
            .await;

        let registry = Registry::new(plain_client(&server), None);
        let mut seen = Vec::new();
        registry
            .repositories(None, |page| {
                seen.extend(page);
                Ok(true)
            })
            .await
            .unwrap();
        assert_eq!(seen, vec!["alpha".to_string(), "beta".to_string()]);
        catalog.assert_async().await;
    }

    #[tokio::test]
    async fn catalog_stops_when_callback_says_so() {
        let mut server = mockito::Server::new_async().await;
        let repos: Vec<String> = (0..100).map(|i| format!("repo-{:03}", i)).collect();
        let body = serde_json::json!({ "repositories": repos }).to_string();
        let first = server
            .mock("GET", "/v2/_catalog")
            .match_query(mockito::Matcher::UrlEncoded("n".into(), "100".into()))
            .with_body(body)
            .expect(1)
            .create_async()
            .await;

        let registry = Registry::new(plain_client(&server), None);
        let mut pages = 0;
        registry
            .repositories(None, |_| {
                pages += 1;
                Ok(false)
            })
            .await
            .unwrap();
        assert_eq!(pages, 1);
        first.assert_async().await;
    }
}
