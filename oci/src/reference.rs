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

use commons::prelude_errors::*;

/// A registry reference of the form `host[:port]/repository[:tag]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub host: String,
    pub repository: String,
    pub tag: Option<String>,
}

impl Reference {
    pub fn new<H, R>(host: H, repository: R) -> Self
    where
        H: Into<String>,
        R: Into<String>,
    {
        Reference {
            host: host.into(),
            repository: repository.into(),
            tag: None,
        }
    }

    pub fn with_tag<T: Into<String>>(mut self, tag: T) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn try_from_str(src: &str) -> Fallible<Self> {
        let (host, rest) = src
            .split_once('/')
            .ok_or_else(|| format_err!("missing repository in reference {:?}", src))?;
        if host.is_empty() {
            bail!("missing host in reference {:?}", src);
        }
        // A colon after the last slash separates the tag; colons before it
        // can only be the host port.
        let (repository, tag) = match rest.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') => (repo, Some(tag.to_string())),
            _ => (rest, None),
        };
        if repository.is_empty() {
            bail!("missing repository in reference {:?}", src);
        }
        Ok(Reference {
            host: host.to_string(),
            repository: repository.to_string(),
            tag,
        })
    }

    /// `host/repository` without the tag.
    pub fn name(&self) -> String {
        format!("{}/{}", self.host, self.repository)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "{}/{}:{}", self.host, self.repository, tag),
            None => write!(f, "{}/{}", self.host, self.repository),
        }
    }
}
