//! In-memory registry for tests
//!
//! Stores single-layer images keyed by `<repository>:<reference>` and
//! counts layer downloads, which lets tests assert on cache and
//! completion-marker behavior without a network.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::client::{LayerRef, RegistryAuth, RegistryClient, RemoteManifest, OCI_MANIFEST_MEDIA_TYPE};
use crate::error::{RegistryError, Result};

#[derive(Debug, Clone)]
struct StoredImage {
    manifest: RemoteManifest,
    layer_data: Vec<u8>,
}

/// An in-memory registry client.
#[derive(Default)]
pub struct MockRegistryClient {
    images: Mutex<BTreeMap<String, StoredImage>>,
    tags: Mutex<BTreeMap<String, Vec<String>>>,
    pulled_layers: AtomicUsize,
    fail_layer_pulls: Mutex<bool>,
    fail_manifest_fetches: Mutex<bool>,
}

impl MockRegistryClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(repository: &str, reference: &str) -> String {
        format!("{}:{reference}", repository.trim_start_matches("oci://"))
    }

    /// Registers an image with the given media types and layer payload.
    pub fn put_image(
        &self,
        repository: &str,
        reference: &str,
        config_media_type: &str,
        layer_media_type: &str,
        layer_data: Vec<u8>,
    ) -> String {
        let digest = format!("sha256:{}", hex::encode(Sha256::digest(&layer_data)));
        let manifest = RemoteManifest {
            digest: digest.clone(),
            media_type: OCI_MANIFEST_MEDIA_TYPE.to_string(),
            config_media_type: config_media_type.to_string(),
            layers: vec![LayerRef {
                media_type: layer_media_type.to_string(),
                digest: digest.clone(),
                size: layer_data.len() as i64,
            }],
            annotations: BTreeMap::new(),
        };

        self.images.lock().unwrap().insert(
            Self::key(repository, reference),
            StoredImage {
                manifest,
                layer_data,
            },
        );
        digest
    }

    /// Sets the tag list returned for a repository.
    pub fn put_tags(&self, repository: &str, tags: &[&str]) {
        self.tags.lock().unwrap().insert(
            repository.trim_start_matches("oci://").to_string(),
            tags.iter().map(|t| t.to_string()).collect(),
        );
    }

    /// Makes every subsequent layer pull fail, simulating a registry that
    /// became unavailable after the manifest was served.
    pub fn fail_layer_pulls(&self, fail: bool) {
        *self.fail_layer_pulls.lock().unwrap() = fail;
    }

    /// Makes every subsequent manifest fetch fail, simulating an
    /// unreachable registry.
    pub fn fail_manifest_fetches(&self, fail: bool) {
        *self.fail_manifest_fetches.lock().unwrap() = fail;
    }

    /// How many layer downloads have been served.
    pub fn pulled_layers(&self) -> usize {
        self.pulled_layers.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryClient for MockRegistryClient {
    async fn list_tags(&self, repository: &str, _auth: &RegistryAuth) -> Result<Vec<String>> {
        let repository = repository.trim_start_matches("oci://");
        self.tags
            .lock()
            .unwrap()
            .get(repository)
            .cloned()
            .ok_or_else(|| RegistryError::Oci {
                message: format!("unknown repository {repository}"),
            })
    }

    async fn manifest(
        &self,
        repository: &str,
        reference: &str,
        _auth: &RegistryAuth,
    ) -> Result<RemoteManifest> {
        if *self.fail_manifest_fetches.lock().unwrap() {
            return Err(RegistryError::Oci {
                message: "registry unavailable".to_string(),
            });
        }
        self.images
            .lock()
            .unwrap()
            .get(&Self::key(repository, reference))
            .map(|image| image.manifest.clone())
            .ok_or_else(|| RegistryError::Oci {
                message: format!("manifest unknown: {repository}:{reference}"),
            })
    }

    async fn pull_layer(
        &self,
        repository: &str,
        layer: &LayerRef,
        _auth: &RegistryAuth,
    ) -> Result<Vec<u8>> {
        if *self.fail_layer_pulls.lock().unwrap() {
            return Err(RegistryError::Oci {
                message: "layer download failed".to_string(),
            });
        }

        let images = self.images.lock().unwrap();
        let image = images
            .values()
            .find(|image| image.manifest.layers.iter().any(|l| l.digest == layer.digest))
            .ok_or_else(|| RegistryError::Oci {
                message: format!("blob unknown: {} in {repository}", layer.digest),
            })?;

        self.pulled_layers.fetch_add(1, Ordering::SeqCst);
        Ok(image.layer_data.clone())
    }

    async fn push(
        &self,
        repository: &str,
        reference: &str,
        config_media_type: &str,
        layer_media_type: &str,
        layer: Vec<u8>,
        _auth: &RegistryAuth,
    ) -> Result<String> {
        Ok(self.put_image(repository, reference, config_media_type, layer_media_type, layer))
    }
}
