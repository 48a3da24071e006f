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

//! The registry's media types, parameterized by format name.

/// Manifest `artifactType` of a repository image.
pub fn artifact_type(format: &str) -> String {
    format!("application/vnd.lk.registry+{}", format)
}

/// Config object holding one package's metadata JSON.
pub fn package_config(format: &str) -> String {
    format!("application/vnd.lk.registry.config.v1.{}+json", format)
}

/// Config object mapping every layer title to its digest.
pub fn index_config(format: &str) -> String {
    format!("application/vnd.lk.registry.index.config.v1.{}+json", format)
}

/// A package blob layer.
pub fn package_layer(format: &str) -> String {
    format!("application/vnd.lk.registry.layer.v1.{}", format)
}

/// A generated metadata layer; the file extension becomes the suffix.
pub fn metadata_layer(format: &str, file_name: &str) -> String {
    match file_name.rsplit('.').next().filter(|ext| {
        // Only a real extension qualifies, not a bare or dot-less name.
        file_name.len() > ext.len() && !ext.is_empty()
    }) {
        Some(ext) => format!(
            "application/vnd.lk.registry.metadata.layer.v1.{}+{}",
            format, ext
        ),
        None => format!("application/vnd.lk.registry.metadata.layer.v1.{}", format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_types() {
        assert_eq!(artifact_type("apk"), "application/vnd.lk.registry+apk");
        assert_eq!(
            package_config("deb"),
            "application/vnd.lk.registry.config.v1.deb+json"
        );
        assert_eq!(
            index_config("rpm"),
            "application/vnd.lk.registry.index.config.v1.rpm+json"
        );
        assert_eq!(
            package_layer("helm"),
            "application/vnd.lk.registry.layer.v1.helm"
        );
    }

    #[test]
    fn metadata_layer_suffixes() {
        assert_eq!(
            metadata_layer("apk", "APKINDEX.tar.gz"),
            "application/vnd.lk.registry.metadata.layer.v1.apk+gz"
        );
        assert_eq!(
            metadata_layer("deb", "Packages"),
            "application/vnd.lk.registry.metadata.layer.v1.deb"
        );
        assert_eq!(
            metadata_layer("deb", "private.key"),
            "application/vnd.lk.registry.metadata.layer.v1.deb+key"
        );
        assert_eq!(
            metadata_layer("rpm", "repomd.xml.asc"),
            "application/vnd.lk.registry.metadata.layer.v1.rpm+asc"
        );
    }
}
