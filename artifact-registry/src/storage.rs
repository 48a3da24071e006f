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

//! Manifest-as-repository storage engine.
//!
//! One OCI image manifest per `(host, repository, format)` holds the whole
//! package repository: two key layers, one layer per package (with the
//! package metadata embedded in the descriptor `data` field) and one layer
//! per generated metadata file. Mutations serialize on a per-reference lock
//! and rebuild the metadata layers from the surviving package set, so the
//! index is always a pure function of the current packages.

use std::collections::BTreeMap;
use std::io::{Seek, SeekFrom};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tempfile::TempDir;

use oci::{body_from_reader, BlobStream, Credentials, Descriptor, Manifest};

use commons::buffer::HashedBuffer;
use commons::cache::DEFAULT_TTL;
use commons::prelude_errors::*;
use commons::{Error, Result};

use crate::artifact::{Artifact, ArtifactInfo, FileArtifact};
use crate::crypt::aes;
use crate::engine::Engine;
use crate::media;
use crate::packages::Format;

/// Request-scoped handle on one `(host, repository, format)` tuple.
///
/// Created per request and dropped with the response; its only durable
/// resource is a scratch directory, removed on drop.
pub struct Storage<F: Format> {
    engine: Arc<Engine>,
    credentials: Option<Credentials>,
    repo: oci::Repository,
    repo_name: String,
    /// Fully qualified reference, `<host>/<repo>:<format>`; also the lock key.
    reference: String,
    key: RwLock<Option<String>>,
    tmp: TempDir,
    _format: PhantomData<F>,
}

impl<F: Format> Storage<F> {
    pub(crate) async fn new(
        engine: Arc<Engine>,
        credentials: Option<Credentials>,
        name: &str,
    ) -> Result<Self> {
        let repo = engine.repository(credentials.as_ref(), name)?;
        let tmp = tempfile::Builder::new()
            .prefix(&format!("lk-artifact-registry-{}-", F::NAME))
            .tempdir()
            .map_err(|e| Error::Internal(e.into()))?;
        let storage = Storage {
            reference: format!("{}/{}:{}", engine.config().backend, name, F::NAME),
            repo_name: name.to_string(),
            engine,
            credentials,
            repo,
            key: RwLock::new(None),
            tmp,
            _format: PhantomData,
        };
        match storage.fetch_key().await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                // Uninitialized; the first write will set up the keys.
            }
            Err(e) => return Err(e),
        }
        Ok(storage)
    }

    /// The decrypted repository private key, if the repository exists.
    pub fn key(&self) -> Option<String> {
        self.key.read().clone()
    }

    /// Scratch directory for upload spooling.
    pub fn scratch_dir(&self) -> &Path {
        self.tmp.path()
    }

    /// Initialize the repository: generate a keypair, wrap the private half
    /// and push a packages-less manifest. Idempotent under the lock.
    pub async fn init(&self) -> Result<()> {
        if self.key().is_some() {
            return Ok(());
        }
        let _guard = self.engine.locks.write(&self.reference).await;
        if self.key().is_some() {
            return Ok(());
        }
        // Another process may have won the race; adopt its key.
        match self.fetch_key().await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        log::info!("initializing {}", self.reference);
        let (private, public) = F::generate_keypair()?;
        let encrypted = aes::encrypt(&self.engine.config().key, private.as_bytes())?;

        let mut layers = Vec::new();
        for (name, data) in [
            (F::PRIVATE_KEY_NAME, encrypted),
            (F::PUBLIC_KEY_NAME, public.into_bytes()),
        ] {
            let file = FileArtifact::new(name, data);
            let desc = Descriptor::from_data(
                media::metadata_layer(F::NAME, file.file_name()),
                file.data(),
            )
            .with_title(name);
            self.repo
                .push_blob_bytes(&desc.digest, file.into_data())
                .await?;
            layers.push(desc);
        }

        let config = Descriptor::empty_config();
        self.repo
            .push_blob_bytes(&config.digest, oci::EMPTY_JSON.to_vec())
            .await?;
        let manifest = Manifest::pack(&media::artifact_type(F::NAME), config, layers);
        self.repo.push_manifest(F::NAME, &manifest).await?;

        *self.key.write() = Some(private);
        log::info!("storage initialized {}", self.reference);
        Ok(())
    }

    /// Descriptor-level information about the artifact stored at `path`.
    pub async fn stat(&self, path: &str) -> Result<ArtifactInfo> {
        let desc = self.find(path).await?;
        Ok(ArtifactInfo {
            path: path.to_string(),
            size: desc.size,
            digest: desc.digest.clone(),
            metadata: desc.data.unwrap_or_default(),
        })
    }

    /// Open the artifact stored at `path` for streaming.
    ///
    /// The private key and the empty path are not addressable.
    pub async fn open(&self, path: &str) -> Result<(ArtifactInfo, BlobStream)> {
        if path == F::PRIVATE_KEY_NAME || path.is_empty() {
            return Err(Error::not_found(path));
        }
        log::info!("opening {}", path);
        let info = self.stat(path).await?;
        let stream = self.repo.blob_stream(&info.digest).await?;
        Ok((info, stream))
    }

    /// Store a package, replacing any previous artifact at the same path,
    /// and rebuild the repository metadata.
    pub async fn write(&self, pkg: F::Package, mut content: HashedBuffer) -> Result<()> {
        if pkg.path() == F::PRIVATE_KEY_NAME || pkg.path() == F::PUBLIC_KEY_NAME {
            return Err(Error::already_exists(pkg.path()));
        }
        self.init().await?;

        let _guard = self.engine.locks.write(&self.reference).await;
        log::info!("uploading {}", pkg.path());

        let metadata = serde_json::to_vec(&pkg).map_err(|e| Error::Internal(e.into()))?;
        let layer = Descriptor {
            media_type: media::package_layer(F::NAME),
            digest: pkg.digest(),
            size: pkg.size(),
            annotations: Default::default(),
            data: Some(metadata.clone()),
        }
        .with_title(pkg.path());

        content
            .seek(SeekFrom::Start(0))
            .map_err(|e| Error::Internal(e.into()))?;
        self.repo
            .push_blob(&layer.digest, pkg.size(), body_from_reader(content))
            .await?;

        let manifest = self.manifest().await?;
        let mut layers: Vec<Descriptor> = Vec::with_capacity(manifest.layers.len() + 1);
        for l in manifest.layers {
            if l.title() == Some(pkg.path()) {
                log::info!("updating layer {} ({})", pkg.path(), l.digest);
                continue;
            }
            layers.push(l);
        }
        layers.push(layer.clone());
        self.update_index(layers).await?;

        if self.engine.config().artifact_tags {
            self.tag_artifact(&pkg, &layer, metadata).await?;
        }
        Ok(())
    }

    /// Remove the artifact stored at `path` and rebuild the metadata.
    ///
    /// Deleting key material is not allowed; those paths read as absent.
    pub async fn delete(&self, path: &str) -> Result<()> {
        if path == F::PRIVATE_KEY_NAME || path == F::PUBLIC_KEY_NAME {
            return Err(Error::not_found(path));
        }
        log::info!("deleting {}", path);
        let _guard = self.engine.locks.write(&self.reference).await;

        let desc = self.find(path).await?;
        if self.engine.config().artifact_tags {
            let data = desc.data.clone().unwrap_or_default();
            if let Ok(pkg) = serde_json::from_slice::<F::Package>(&data) {
                self.delete_artifact_tag(&pkg).await?;
            }
        }

        let manifest = self.manifest().await?;
        let layers: Vec<Descriptor> = manifest
            .layers
            .into_iter()
            .filter(|l| l.title() != Some(path))
            .collect();
        self.update_index(layers).await
    }

    /// The decoded metadata of every package layer.
    pub async fn artifacts(&self) -> Result<Vec<F::Package>> {
        let manifest = self.manifest().await?;
        let mut out = Vec::new();
        for layer in &manifest.layers {
            if layer.media_type != media::package_layer(F::NAME) {
                continue;
            }
            let data = layer.data.as_deref().ok_or_else(|| {
                Error::Internal(format_err!(
                    "package layer {} carries no metadata",
                    layer.digest
                ))
            })?;
            let pkg: F::Package =
                serde_json::from_slice(data).map_err(|e| Error::Internal(e.into()))?;
            out.push(pkg);
        }
        Ok(out)
    }

    /// Total repository size: unique layer bytes across the manifest.
    pub async fn size(&self) -> Result<u64> {
        let manifest = self.manifest().await?;
        let mut seen = std::collections::HashSet::new();
        let mut size = 0;
        for layer in &manifest.layers {
            if seen.insert(layer.digest.clone()) {
                size += layer.size;
            }
        }
        Ok(size)
    }

    /// Rebuild the metadata layers from the surviving package layers and
    /// push the new manifest.
    async fn update_index(&self, layers: Vec<Descriptor>) -> Result<()> {
        let (key_layers, packages, package_layers) = partition_layers::<F>(layers)?;
        let private_key = self.key().ok_or_else(|| {
            Error::Internal(format_err!("repository key is not initialized"))
        })?;

        log::info!("updating index");
        let files = F::index(&private_key, &packages)?;

        let mut index = BTreeMap::new();
        for pkg in &packages {
            index.insert(pkg.path().to_string(), pkg.digest().to_string());
        }
        for file in &files {
            index.insert(file.path().to_string(), file.digest().to_string());
        }
        let index_bytes =
            serde_json::to_vec(&index).map_err(|e| Error::Internal(e.into()))?;
        let config = Descriptor::from_data(media::index_config(F::NAME), &index_bytes);
        self.repo
            .push_blob_bytes(&config.digest, index_bytes)
            .await?;

        let mut all_layers = key_layers;
        all_layers.extend(package_layers);
        for file in files {
            let desc = Descriptor::from_data(
                media::metadata_layer(F::NAME, file.file_name()),
                file.data(),
            )
            .with_title(file.path());
            self.repo
                .push_blob_bytes(&desc.digest, file.into_data())
                .await?;
            all_layers.push(desc);
        }

        let manifest = Manifest::pack(&media::artifact_type(F::NAME), config, all_layers);
        self.repo.push_manifest(F::NAME, &manifest).await?;
        log::info!("uploaded {}", self.reference);
        Ok(())
    }

    /// Tag the package as its own image for discoverability.
    ///
    /// Runs after the main manifest update: a failure here is reported, but
    /// readers already see the package through the main manifest.
    async fn tag_artifact(
        &self,
        pkg: &F::Package,
        layer: &Descriptor,
        metadata: Vec<u8>,
    ) -> Result<()> {
        let side = self
            .engine
            .repository(self.credentials.as_ref(), &self.artifact_name(pkg))?;
        let reference = artifact_tag(pkg.version());
        log::info!("tagging artifact {}:{}", side.name(), reference);

        side.mount_blob(&layer.digest, &self.repo).await?;
        let config = Descriptor::from_data(media::package_config(F::NAME), &metadata);
        side.push_blob_bytes(&config.digest, metadata).await?;
        let manifest = Manifest::pack(
            &media::artifact_type(F::NAME),
            config,
            vec![layer.clone()],
        );
        side.push_manifest(&reference, &manifest).await?;
        Ok(())
    }

    async fn delete_artifact_tag(&self, pkg: &F::Package) -> Result<()> {
        let side = self
            .engine
            .repository(self.credentials.as_ref(), &self.artifact_name(pkg))?;
        let reference = artifact_tag(pkg.version());
        match side.resolve(&reference).await {
            Ok(desc) => side.delete_manifest(&desc.digest).await,
            // A missing side-tag is tolerated.
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn artifact_name(&self, pkg: &F::Package) -> String {
        let parts: Vec<&str> = [pkg.name(), pkg.arch(), F::NAME]
            .iter()
            .copied()
            .filter(|s| !s.is_empty())
            .collect();
        format!("{}/{}", self.repo_name, parts.join("-"))
    }

    /// Resolve and decode the repository manifest, via the digest-keyed
    /// cache.
    async fn manifest(&self) -> Result<Manifest> {
        let desc = self.repo.resolve(F::NAME).await?;
        let cache_key = desc.digest.to_string();
        if let Some(m) = self.engine.manifests.get(&cache_key) {
            // Reset the TTL on use.
            self.engine
                .manifests
                .set(cache_key, m.clone(), Some(DEFAULT_TTL));
            return Ok(m);
        }
        log::info!("retrieve manifest {}", desc.digest);
        let manifest = self.repo.manifest(&desc).await?;
        if manifest.artifact_type.as_deref() != Some(media::artifact_type(F::NAME).as_str()) {
            return Err(Error::InvalidArtifactType(
                manifest
                    .artifact_type
                    .or(manifest.media_type)
                    .unwrap_or_default(),
            ));
        }
        self.engine
            .manifests
            .set(cache_key, manifest.clone(), Some(DEFAULT_TTL));
        Ok(manifest)
    }

    /// Locate the private-key layer, decrypt it and cache the key under the
    /// layer digest so identical manifests share the decryption.
    async fn fetch_key(&self) -> Result<()> {
        let desc = self.find(F::PRIVATE_KEY_NAME).await?;
        let cache_key = desc.digest.to_string();
        if let Some(key) = self.engine.keys.get(&cache_key) {
            *self.key.write() = Some(key);
            return Ok(());
        }
        let blob = self.repo.blob(&desc.digest).await?;
        let private = aes::decrypt(&self.engine.config().key, &blob)?;
        let private = String::from_utf8(private)
            .map_err(|e| Error::Internal(format_err!("decrypted key is not utf-8: {}", e)))?;
        self.engine.keys.set(cache_key, private.clone(), None);
        *self.key.write() = Some(private);
        Ok(())
    }

    async fn find(&self, path: &str) -> Result<Descriptor> {
        let manifest = self.manifest().await?;
        manifest
            .find_layer(path)
            .cloned()
            .ok_or_else(|| Error::not_found(path))
    }
}

/// Split manifest layers into key layers and package layers, decoding the
/// embedded package metadata; metadata layers are dropped.
#[allow(clippy::type_complexity)]
fn partition_layers<F: Format>(
    layers: Vec<Descriptor>,
) -> Result<(Vec<Descriptor>, Vec<F::Package>, Vec<Descriptor>)> {
    let mut key_layers = Vec::new();
    let mut packages = Vec::new();
    let mut package_layers = Vec::new();
    for layer in layers {
        let is_key = matches!(
            layer.title(),
            Some(title) if title == F::PRIVATE_KEY_NAME || title == F::PUBLIC_KEY_NAME
        );
        if is_key {
            key_layers.push(layer);
            continue;
        }
        if layer.media_type != media::package_layer(F::NAME) {
            continue;
        }
        let data = layer.data.as_deref().ok_or_else(|| {
            Error::Internal(format_err!(
                "package layer {} carries no metadata",
                layer.digest
            ))
        })?;
        let pkg: F::Package =
            serde_json::from_slice(data).map_err(|e| Error::Internal(e.into()))?;
        packages.push(pkg);
        package_layers.push(layer);
    }
    Ok((key_layers, packages, package_layers))
}

/// The side-tag for a package version; OCI tags cannot carry `~` or `+`.
fn artifact_tag(version: &str) -> String {
    let tag = if version.is_empty() { "latest" } else { version };
    tag.replace('~', "-").replace('+', "-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, EngineConfig};
    use serde_derive::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct TestPackage {
        name: String,
        version: String,
        arch: String,
        path: String,
        size: u64,
        digest: String,
    }

    impl TestPackage {
        fn new(name: &str, data: &[u8]) -> (Self, HashedBuffer) {
            let buf = HashedBuffer::from_reader(data).unwrap();
            let pkg = TestPackage {
                name: name.to_string(),
                version: "1.0".to_string(),
                arch: "x86_64".to_string(),
                path: format!("{}-1.0.pkg", name),
                size: buf.size(),
                digest: buf.sums().sha256_hex(),
            };
            (pkg, buf)
        }
    }

    impl Artifact for TestPackage {
        fn name(&self) -> &str {
            &self.name
        }
        fn version(&self) -> &str {
            &self.version
        }
        fn arch(&self) -> &str {
            &self.arch
        }
        fn path(&self) -> &str {
            &self.path
        }
        fn size(&self) -> u64 {
            self.size
        }
        fn digest(&self) -> oci::Digest {
            oci::Digest::from_encoded(&self.digest)
        }
    }

    struct TestFormat;

    impl Format for TestFormat {
        type Package = TestPackage;
        const NAME: &'static str = "test";

        fn generate_keypair() -> Result<(String, String)> {
            Ok(("test-private".to_string(), "test-public".to_string()))
        }

        fn index(_key: &str, packages: &[TestPackage]) -> Result<Vec<FileArtifact>> {
            if packages.is_empty() {
                return Ok(Vec::new());
            }
            let mut listing = String::new();
            for pkg in packages {
                listing.push_str(&format!("{} {}\n", pkg.name, pkg.version));
            }
            Ok(vec![FileArtifact::new("listing.txt", listing.into_bytes())])
        }
    }

    const ARTIFACT_TYPE: &str = "application/vnd.lk.registry+test";

    async fn engine_for(server: &mockito::Server) -> Arc<Engine> {
        let mut config = EngineConfig::new(server.host_with_port(), [7u8; 32]);
        config.client.plain_http = true;
        Engine::new(config)
    }

    fn key_manifest(engine: &Engine) -> (Manifest, Vec<u8>) {
        let encrypted = aes::encrypt(&engine.config().key, b"test-private").unwrap();
        let private = Descriptor::from_data(
            "application/vnd.lk.registry.metadata.layer.v1.test+key",
            &encrypted,
        )
        .with_title("private.key");
        let public = Descriptor::from_data(
            "application/vnd.lk.registry.metadata.layer.v1.test+key",
            b"test-public",
        )
        .with_title("repository.key");
        let manifest = Manifest::pack(
            ARTIFACT_TYPE,
            Descriptor::empty_config(),
            vec![private.clone(), public],
        );
        (manifest, encrypted)
    }

    async fn mock_manifest(
        server: &mut mockito::Server,
        manifest: &Manifest,
    ) -> Vec<mockito::Mock> {
        let body = serde_json::to_vec(manifest).unwrap();
        let desc = Descriptor::from_data(oci::MANIFEST_MEDIA_TYPE, &body);
        vec![
            server
                .mock("HEAD", "/v2/my-repo/manifests/test")
                .with_header("docker-content-digest", desc.digest.as_str())
                .with_header("content-type", oci::MANIFEST_MEDIA_TYPE)
                .create_async()
                .await,
            server
                .mock(
                    "GET",
                    format!("/v2/my-repo/manifests/{}", desc.digest).as_str(),
                )
                .with_header("content-type", oci::MANIFEST_MEDIA_TYPE)
                .with_body(body)
                .create_async()
                .await,
        ]
    }

    #[tokio::test]
    async fn uninitialized_repository_has_no_key() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", "/v2/my-repo/manifests/test")
            .with_status(404)
            .create_async()
            .await;

        let engine = engine_for(&server).await;
        let storage = engine
            .storage::<TestFormat>(None, "my-repo")
            .await
            .unwrap();
        assert!(storage.key().is_none());

        let err = storage.stat("anything").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn init_pushes_keys_and_manifest_once() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", "/v2/my-repo/manifests/test")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock(
                "HEAD",
                mockito::Matcher::Regex("/v2/my-repo/blobs/sha256:.*".to_string()),
            )
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("POST", "/v2/my-repo/blobs/uploads/")
            .with_status(202)
            .with_header("location", "/v2/my-repo/blobs/uploads/session")
            .create_async()
            .await;
        let uploads = server
            .mock(
                "PUT",
                mockito::Matcher::Regex("/v2/my-repo/blobs/uploads/session.*".to_string()),
            )
            .with_status(201)
            // Encrypted private key, public key, empty config.
            .expect(3)
            .create_async()
            .await;
        let manifest_put = server
            .mock("PUT", "/v2/my-repo/manifests/test")
            .match_body(mockito::Matcher::Regex(
                "private.key(.*)repository.key".to_string(),
            ))
            .with_status(201)
            .expect(1)
            .create_async()
            .await;

        let engine = engine_for(&server).await;
        let storage = engine
            .storage::<TestFormat>(None, "my-repo")
            .await
            .unwrap();
        assert!(storage.key().is_none());

        storage.init().await.unwrap();
        assert_eq!(storage.key().as_deref(), Some("test-private"));

        // Init is idempotent: the manifest is not pushed again.
        storage.init().await.unwrap();

        uploads.assert_async().await;
        manifest_put.assert_async().await;
    }

    #[tokio::test]
    async fn fetch_key_decrypts_private_layer() {
        let mut server = mockito::Server::new_async().await;
        let engine = engine_for(&server).await;
        let (manifest, encrypted) = key_manifest(&engine);
        let _mocks = mock_manifest(&mut server, &manifest).await;
        let key_digest = &manifest.layers[0].digest;
        server
            .mock(
                "GET",
                format!("/v2/my-repo/blobs/{}", key_digest).as_str(),
            )
            .with_body(encrypted)
            .create_async()
            .await;

        let storage = engine
            .storage::<TestFormat>(None, "my-repo")
            .await
            .unwrap();
        assert_eq!(storage.key().as_deref(), Some("test-private"));
    }

    #[tokio::test]
    async fn open_refuses_private_key_and_empty_paths() {
        let mut server = mockito::Server::new_async().await;
        let engine = engine_for(&server).await;
        let (manifest, encrypted) = key_manifest(&engine);
        let _mocks = mock_manifest(&mut server, &manifest).await;
        let key_digest = &manifest.layers[0].digest;
        server
            .mock(
                "GET",
                format!("/v2/my-repo/blobs/{}", key_digest).as_str(),
            )
            .with_body(encrypted)
            .create_async()
            .await;

        let storage = engine
            .storage::<TestFormat>(None, "my-repo")
            .await
            .unwrap();
        assert!(storage.open("private.key").await.unwrap_err().is_not_found());
        assert!(storage.open("").await.unwrap_err().is_not_found());
        // The public key is served.
        assert!(storage.stat("repository.key").await.is_ok());
    }

    #[tokio::test]
    async fn foreign_artifact_type_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        let engine = engine_for(&server).await;
        let manifest = Manifest::pack(
            "application/vnd.oci.image.config.v1+json",
            Descriptor::empty_config(),
            vec![],
        );
        let _mocks = mock_manifest(&mut server, &manifest).await;

        let storage = engine
            .storage::<TestFormat>(None, "my-repo")
            .await
            .unwrap();
        let err = storage.stat("anything").await.unwrap_err();
        assert!(matches!(err, Error::InvalidArtifactType(_)));
    }

    #[tokio::test]
    async fn stat_returns_embedded_metadata() {
        let mut server = mockito::Server::new_async().await;
        let engine = engine_for(&server).await;
        let (mut manifest, encrypted) = key_manifest(&engine);
        let (pkg, _) = TestPackage::new("demo", b"demo-bytes");
        let metadata = serde_json::to_vec(&pkg).unwrap();
        manifest.layers.push(
            Descriptor {
                media_type: "application/vnd.lk.registry.layer.v1.test".to_string(),
                digest: pkg.digest(),
                size: pkg.size,
                annotations: Default::default(),
                data: Some(metadata.clone()),
            }
            .with_title("demo-1.0.pkg"),
        );
        let _mocks = mock_manifest(&mut server, &manifest).await;
        let key_digest = &manifest.layers[0].digest;
        server
            .mock(
                "GET",
                format!("/v2/my-repo/blobs/{}", key_digest).as_str(),
            )
            .with_body(encrypted)
            .create_async()
            .await;

        let storage = engine
            .storage::<TestFormat>(None, "my-repo")
            .await
            .unwrap();
        let info = storage.stat("demo-1.0.pkg").await.unwrap();
        assert_eq!(info.size, pkg.size);
        assert_eq!(info.metadata, metadata);

        let artifacts = storage.artifacts().await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].name, "demo");

        // Size deduplicates identical digests.
        let size = storage.size().await.unwrap();
        let unique: u64 = manifest.layers.iter().map(|l| l.size).sum();
        assert_eq!(size, unique);
    }

    #[tokio::test]
    async fn write_replaces_layer_and_rebuilds_metadata() {
        let mut server = mockito::Server::new_async().await;
        let engine = engine_for(&server).await;
        let (mut manifest, encrypted) = key_manifest(&engine);
        // A stale metadata layer that must disappear after the write.
        manifest.layers.push(
            Descriptor::from_data(
                "application/vnd.lk.registry.metadata.layer.v1.test+txt",
                b"old listing",
            )
            .with_title("listing.txt"),
        );
        let _mocks = mock_manifest(&mut server, &manifest).await;
        let key_digest = manifest.layers[0].digest.clone();
        server
            .mock(
                "GET",
                format!("/v2/my-repo/blobs/{}", key_digest).as_str(),
            )
            .with_body(encrypted)
            .create_async()
            .await;

        // Blob existence checks and uploads.
        server
            .mock(
                "HEAD",
                mockito::Matcher::Regex("/v2/my-repo/blobs/sha256:.*".to_string()),
            )
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("POST", "/v2/my-repo/blobs/uploads/")
            .with_status(202)
            .with_header("location", "/v2/my-repo/blobs/uploads/session")
            .create_async()
            .await;
        let uploads = server
            .mock(
                "PUT",
                mockito::Matcher::Regex("/v2/my-repo/blobs/uploads/session.*".to_string()),
            )
            .with_status(201)
            .expect_at_least(3)
            .create_async()
            .await;
        let manifest_put = server
            .mock("PUT", "/v2/my-repo/manifests/test")
            .match_body(mockito::Matcher::Regex(
                "listing.txt(.*)demo-1.0.pkg|demo-1.0.pkg(.*)listing.txt".to_string(),
            ))
            .with_status(201)
            .expect(1)
            .create_async()
            .await;

        let storage = engine
            .storage::<TestFormat>(None, "my-repo")
            .await
            .unwrap();
        let (pkg, content) = TestPackage::new("demo", b"demo-bytes");
        storage.write(pkg, content).await.unwrap();

        uploads.assert_async().await;
        manifest_put.assert_async().await;
    }

    #[tokio::test]
    async fn delete_requires_existing_layer() {
        let mut server = mockito::Server::new_async().await;
        let engine = engine_for(&server).await;
        let (manifest, encrypted) = key_manifest(&engine);
        let _mocks = mock_manifest(&mut server, &manifest).await;
        let key_digest = &manifest.layers[0].digest;
        server
            .mock(
                "GET",
                format!("/v2/my-repo/blobs/{}", key_digest).as_str(),
            )
            .with_body(encrypted)
            .create_async()
            .await;

        let storage = engine
            .storage::<TestFormat>(None, "my-repo")
            .await
            .unwrap();
        assert!(storage.delete("missing.pkg").await.unwrap_err().is_not_found());
        // Key layers are not deletable, and read as absent.
        assert!(storage
            .delete("private.key")
            .await
            .unwrap_err()
            .is_not_found());
        assert!(storage
            .delete("repository.key")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn partition_layers_splits_and_drops_metadata() {
        let (pkg, _) = TestPackage::new("demo", b"demo-bytes");
        let metadata = serde_json::to_vec(&pkg).unwrap();
        let layers = vec![
            Descriptor::from_data("application/vnd.lk.registry.metadata.layer.v1.test+key", b"k")
                .with_title("private.key"),
            Descriptor::from_data("application/vnd.lk.registry.metadata.layer.v1.test+key", b"p")
                .with_title("repository.key"),
            Descriptor {
                media_type: "application/vnd.lk.registry.layer.v1.test".to_string(),
                digest: pkg.digest(),
                size: pkg.size,
                annotations: Default::default(),
                data: Some(metadata),
            }
            .with_title("demo-1.0.pkg"),
            Descriptor::from_data(
                "application/vnd.lk.registry.metadata.layer.v1.test+txt",
                b"stale",
            )
            .with_title("listing.txt"),
        ];

        let (keys, packages, package_layers) = partition_layers::<TestFormat>(layers).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].name, "demo");
        assert_eq!(package_layers.len(), 1);
    }

    #[test]
    fn artifact_tags_are_sanitized() {
        assert_eq!(artifact_tag("1.0.0"), "1.0.0");
        assert_eq!(artifact_tag("1.0.0~rc1+meta"), "1.0.0-rc1-meta");
        assert_eq!(artifact_tag(""), "latest");
    }
}
