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

//! Embedded setup-script templates.

use actix_web::HttpRequest;

pub const APK_SETUP: &str = include_str!("setup/apk.sh");
pub const DEB_SETUP: &str = include_str!("setup/deb.sh");
pub const RPM_SETUP: &str = include_str!("setup/rpm.sh");

/// The yum/dnf repository definition served at `/<repo>.repo`.
pub const RPM_REPO_DEFINITION: &str = "[{{name}}]\n\
                                       name={{name}}\n\
                                       baseurl={{url}}\n\
                                       enabled=1\n\
                                       gpgcheck=1\n\
                                       gpgkey={{url}}/{{key}}\n";

/// Replace every `{{key}}` placeholder with its value.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{}}}}}", key), value);
    }
    out
}

/// The request scheme, honoring proxies.
pub fn scheme(req: &HttpRequest) -> String {
    req.connection_info().scheme().to_string()
}

/// A filesystem-friendly name for a repository, as used for the files the
/// setup scripts install.
pub fn local_name(host: &str, repo: &str) -> String {
    let name = if repo.is_empty() { host } else { repo };
    name.replace('/', "-").replace('.', "-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_placeholders() {
        let out = render("hello {{user}} at {{host}}", &[("user", "alice"), ("host", "example.com")]);
        assert_eq!(out, "hello alice at example.com");
    }

    #[test]
    fn repo_definition_renders() {
        let out = render(
            RPM_REPO_DEFINITION,
            &[
                ("name", "my-repo"),
                ("url", "https://registry.example.com/rpm/my-repo"),
                ("key", "repository.key"),
            ],
        );
        assert!(out.starts_with("[my-repo]\n"));
        assert!(out.contains("baseurl=https://registry.example.com/rpm/my-repo\n"));
        assert!(out.contains("gpgkey=https://registry.example.com/rpm/my-repo/repository.key\n"));
    }

    #[test]
    fn local_names_are_file_friendly() {
        assert_eq!(local_name("example.com", ""), "example-com");
        assert_eq!(local_name("example.com", "my/repo"), "my-repo");
    }
}
