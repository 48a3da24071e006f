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

//! Configuration lookup, parsing and validation.
//!
//! CLI flags take precedence over `ARTIFACT_REGISTRY_*` environment
//! variables; the merged result is validated into [`AppSettings`].

use std::path::PathBuf;

use structopt::StructOpt;

use artifact_registry::crypt::aes;
use artifact_registry::{EngineConfig, ProxyOptions};
use commons::prelude_errors::*;
use oci::Credentials;

// Environment variables that cannot ride on a structopt attribute: booleans
// have no CLI value to parse.
pub const ENV_AES_KEY: &str = "ARTIFACT_REGISTRY_AES_KEY";
pub const ENV_NO_HTTPS: &str = "ARTIFACT_REGISTRY_NO_HTTPS";
pub const ENV_INSECURE: &str = "ARTIFACT_REGISTRY_INSECURE";
pub const ENV_TAG_ARTIFACTS: &str = "ARTIFACT_REGISTRY_TAG_ARTIFACTS";
pub const ENV_DISABLE_UI: &str = "ARTIFACT_REGISTRY_DISABLE_UI";
pub const ENV_PROXY_NO_HTTPS: &str = "ARTIFACT_REGISTRY_PROXY_NO_HTTPS";
pub const ENV_PROXY_INSECURE: &str = "ARTIFACT_REGISTRY_PROXY_INSECURE";

/// CLI configuration flags.
#[derive(Debug, StructOpt)]
#[structopt(name = "lkard", about = "OCI-backed artifact registry")]
pub struct CliOptions {
    /// Verbosity level
    #[structopt(long = "verbosity", short = "v", parse(from_occurrences))]
    pub verbosity: u8,

    /// Address to listen on
    #[structopt(long = "addr", env = "ARTIFACT_REGISTRY_ADDRESS")]
    pub address: Option<String>,

    /// Registry backend hostname (and port if not 443 or 80)
    #[structopt(long = "backend", env = "ARTIFACT_REGISTRY_BACKEND")]
    pub backend: Option<String>,

    /// AES key to encrypt the repositories keys
    #[structopt(long = "aes-key", env = "ARTIFACT_REGISTRY_AES_KEY", hide_env_values = true)]
    pub aes_key: Option<String>,

    /// Domain to use to serve the repositories as subdomains
    #[structopt(long = "domain", env = "ARTIFACT_REGISTRY_DOMAIN")]
    pub domain: Option<String>,

    /// Disable backend registry client https
    #[structopt(long = "no-https")]
    pub no_https: bool,

    /// Disable backend registry client tls verification
    #[structopt(long = "insecure")]
    pub insecure: bool,

    /// Tag artifacts manifests
    #[structopt(long = "tag-artifacts")]
    pub tag_artifacts: bool,

    /// TLS client certificate authority
    #[structopt(long = "client-ca", env = "ARTIFACT_REGISTRY_CLIENT_CA")]
    pub client_ca: Option<PathBuf>,

    /// TLS certificate
    #[structopt(long = "tls-cert", env = "ARTIFACT_REGISTRY_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// TLS key
    #[structopt(long = "tls-key", env = "ARTIFACT_REGISTRY_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Disable the web UI
    #[structopt(long = "disable-ui")]
    pub disable_ui: bool,

    /// Proxy backend registry hostname (and port if not 443 or 80)
    #[structopt(long = "proxy", env = "ARTIFACT_REGISTRY_PROXY")]
    pub proxy: Option<String>,

    /// Disable proxy registry client https
    #[structopt(long = "proxy-no-https")]
    pub proxy_no_https: bool,

    /// Disable proxy registry client tls verification
    #[structopt(long = "proxy-insecure")]
    pub proxy_insecure: bool,

    /// Proxy TLS client certificate authority
    #[structopt(long = "proxy-client-ca", env = "ARTIFACT_REGISTRY_PROXY_CLIENT_CA")]
    pub proxy_client_ca: Option<PathBuf>,

    /// Proxy registry user
    #[structopt(long = "proxy-user", env = "ARTIFACT_REGISTRY_PROXY_USER")]
    pub proxy_user: Option<String>,

    /// Proxy registry password
    #[structopt(long = "proxy-password", env = "ARTIFACT_REGISTRY_PROXY_PASSWORD", hide_env_values = true)]
    pub proxy_password: Option<String>,

    /// Single repository to serve
    #[structopt(name = "repository")]
    pub repository: Option<String>,
}

/// Runtime application settings (validated config).
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub address: String,
    pub domain: Option<String>,
    pub tls: Option<(PathBuf, PathBuf)>,
    pub disable_ui: bool,
    pub verbosity: log::LevelFilter,
    pub engine: EngineConfig,
}

impl AppSettings {
    /// Validate the merged CLI and environment options.
    pub fn assemble(options: CliOptions) -> Fallible<Self> {
        let aes_key = options
            .aes_key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| format_err!("${} must be set", ENV_AES_KEY))?;

        let backend = options
            .backend
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| "docker.io".to_string());

        let mut engine = EngineConfig::new(backend, aes::derive_key(&aes_key));
        engine.artifact_tags = options.tag_artifacts || env_flag(ENV_TAG_ARTIFACTS);
        engine.repo = options.repository.filter(|r| !r.is_empty());
        engine.client.plain_http = options.no_https || env_flag(ENV_NO_HTTPS);
        engine.client.insecure = options.insecure || env_flag(ENV_INSECURE);
        engine.client.client_ca = read_pem(options.client_ca.as_ref())?;

        if let Some(host) = options.proxy.filter(|p| !p.is_empty()) {
            let mut proxy = ProxyOptions {
                host,
                ..Default::default()
            };
            proxy.options.plain_http = options.proxy_no_https || env_flag(ENV_PROXY_NO_HTTPS);
            proxy.options.insecure = options.proxy_insecure || env_flag(ENV_PROXY_INSECURE);
            proxy.options.client_ca = read_pem(options.proxy_client_ca.as_ref())?;
            if let Some(user) = options.proxy_user.filter(|u| !u.is_empty()) {
                proxy.options.basic_auth = Some(Credentials::new(
                    user,
                    options.proxy_password.unwrap_or_default(),
                ));
            }
            engine.proxy = Some(proxy);
        }

        let tls = match (options.tls_cert, options.tls_key) {
            (Some(cert), Some(key)) => Some((cert, key)),
            (None, None) => None,
            _ => bail!("--tls-cert and --tls-key must be set together"),
        };

        let verbosity = match options.verbosity {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        };

        Ok(AppSettings {
            address: listen_address(options.address),
            domain: options.domain.filter(|d| !d.is_empty()),
            tls,
            disable_ui: options.disable_ui || env_flag(ENV_DISABLE_UI),
            verbosity,
            engine,
        })
    }
}

/// Normalize a Go-style `:port` listen address for the Rust binder.
fn listen_address(address: Option<String>) -> String {
    let address = address
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| ":9887".to_string());
    if address.starts_with(':') {
        format!("0.0.0.0{}", address)
    } else {
        address
    }
}

/// Truthy environment flag, for booleans that cannot carry a CLI value.
fn env_flag(key: &str) -> bool {
    matches!(
        std::env::var(key).as_deref(),
        Ok("1") | Ok("true") | Ok("TRUE") | Ok("True") | Ok("yes")
    )
}

fn read_pem(path: Option<&PathBuf>) -> Fallible<Option<Vec<u8>>> {
    match path {
        Some(path) => {
            let pem = std::fs::read(path)
                .with_context(|| format!("could not read {}", path.display()))?;
            Ok(Some(pem))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use structopt::StructOpt;

    fn options(args: &[&str]) -> CliOptions {
        let mut argv = vec!["lkard"];
        argv.extend_from_slice(args);
        CliOptions::from_iter(argv)
    }

    #[test]
    fn requires_aes_key() {
        let opts = options(&["--backend", "registry.example.com"]);
        assert!(AppSettings::assemble(opts).is_err());
    }

    #[test]
    fn derives_engine_config() {
        let opts = options(&[
            "--aes-key",
            "secret",
            "--backend",
            "registry.example.com",
            "--no-https",
            "--tag-artifacts",
            "my-repo",
        ]);
        let settings = AppSettings::assemble(opts).unwrap();
        assert_eq!(settings.engine.backend, "registry.example.com");
        assert_eq!(settings.engine.key, aes::derive_key("secret"));
        assert!(settings.engine.client.plain_http);
        assert!(settings.engine.artifact_tags);
        assert_eq!(settings.engine.repo.as_deref(), Some("my-repo"));
        assert_eq!(settings.address, "0.0.0.0:9887");
    }

    #[test]
    fn proxy_credentials_are_static() {
        let opts = options(&[
            "--aes-key",
            "secret",
            "--proxy",
            "mirror.example.com",
            "--proxy-user",
            "mirror",
            "--proxy-password",
            "hunter2",
        ]);
        let settings = AppSettings::assemble(opts).unwrap();
        let proxy = settings.engine.proxy.unwrap();
        assert_eq!(proxy.host, "mirror.example.com");
        let creds = proxy.options.basic_auth.unwrap();
        assert_eq!(creds.username, "mirror");
        assert_eq!(creds.password, "hunter2");
    }

    #[test]
    fn tls_options_must_pair() {
        let opts = options(&["--aes-key", "secret", "--tls-cert", "/tmp/cert.pem"]);
        assert!(AppSettings::assemble(opts).is_err());
    }
}
