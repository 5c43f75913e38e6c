//! Release storage drivers
//!
//! Release revisions are persisted in cluster Secrets, one Secret per
//! revision, gzip-compressed JSON under the `release` data key. The
//! [`ReleaseStorage`] trait is the seam; tests use [`MockReleaseStorage`].

use std::collections::BTreeMap;
use std::io::{Read, Write};

use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{DeleteParams, ListParams, ObjectMeta, PostParams};
use kube::Api;

use crate::error::{HelmError, Result};
use crate::release::StoredRelease;

const RELEASE_DATA_KEY: &str = "release";
const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const RELEASE_NAME_LABEL: &str = "navecd.io/release-name";
const RELEASE_VERSION_LABEL: &str = "navecd.io/release-version";

/// Persistence of release revisions.
#[async_trait]
pub trait ReleaseStorage: Send + Sync {
    /// The newest revision, or `None` when the release was never
    /// installed.
    async fn get_latest(&self, namespace: &str, name: &str) -> Result<Option<StoredRelease>>;

    /// Persists a new revision.
    async fn create(&self, release: &StoredRelease) -> Result<()>;

    /// Removes every revision of a release.
    async fn delete_all(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Serializes and gzips a release for storage.
fn encode_release(release: &StoredRelease) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(release)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .and_then(|_| encoder.finish())
        .map_err(|err| HelmError::Storage {
            message: format!("failed to compress release: {err}"),
        })
}

fn decode_release(data: &[u8]) -> Result<StoredRelease> {
    let mut decoder = GzDecoder::new(data);
    let mut json = Vec::new();
    decoder
        .read_to_end(&mut json)
        .map_err(|err| HelmError::Storage {
            message: format!("failed to decompress release: {err}"),
        })?;
    Ok(serde_json::from_slice(&json)?)
}

/// Secrets-backed driver, one Secret per revision named
/// `navecd.release.v1.<name>.v<version>`.
pub struct SecretsStorage {
    client: kube::Client,
}

impl SecretsStorage {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn secret_name(name: &str, version: u32) -> String {
        format!("navecd.release.v1.{name}.v{version}")
    }

    fn selector(name: &str) -> String {
        format!("{MANAGED_BY_LABEL}=navecd,{RELEASE_NAME_LABEL}={name}")
    }

    fn to_secret(release: &StoredRelease) -> Result<Secret> {
        let mut labels = BTreeMap::new();
        labels.insert(MANAGED_BY_LABEL.to_string(), "navecd".to_string());
        labels.insert(RELEASE_NAME_LABEL.to_string(), release.name.clone());
        labels.insert(
            RELEASE_VERSION_LABEL.to_string(),
            release.version.to_string(),
        );

        let mut data = BTreeMap::new();
        data.insert(
            RELEASE_DATA_KEY.to_string(),
            ByteString(encode_release(release)?),
        );

        Ok(Secret {
            metadata: ObjectMeta {
                name: Some(Self::secret_name(&release.name, release.version)),
                namespace: Some(release.namespace.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            data: Some(data),
            type_: Some("navecd.io/release.v1".to_string()),
            ..Default::default()
        })
    }

    fn from_secret(secret: &Secret) -> Result<StoredRelease> {
        let data = secret
            .data
            .as_ref()
            .and_then(|data| data.get(RELEASE_DATA_KEY))
            .ok_or_else(|| HelmError::Storage {
                message: format!(
                    "release secret {} has no '{RELEASE_DATA_KEY}' key",
                    secret.metadata.name.as_deref().unwrap_or("<unnamed>")
                ),
            })?;
        decode_release(&data.0)
    }
}

#[async_trait]
impl ReleaseStorage for SecretsStorage {
    async fn get_latest(&self, namespace: &str, name: &str) -> Result<Option<StoredRelease>> {
        let params = ListParams::default().labels(&Self::selector(name));
        let secrets = self
            .api(namespace)
            .list(&params)
            .await
            .map_err(|err| HelmError::Storage {
                message: err.to_string(),
            })?;

        let mut releases: Vec<StoredRelease> = secrets
            .items
            .iter()
            .map(Self::from_secret)
            .collect::<Result<_>>()?;

        releases.sort_by_key(|release| release.version);
        Ok(releases.pop())
    }

    async fn create(&self, release: &StoredRelease) -> Result<()> {
        let secret = Self::to_secret(release)?;
        self.api(&release.namespace)
            .create(&PostParams::default(), &secret)
            .await
            .map_err(|err| HelmError::Storage {
                message: err.to_string(),
            })?;
        Ok(())
    }

    async fn delete_all(&self, namespace: &str, name: &str) -> Result<()> {
        let params = ListParams::default().labels(&Self::selector(name));
        self.api(namespace)
            .delete_collection(&DeleteParams::default(), &params)
            .await
            .map_err(|err| HelmError::Storage {
                message: err.to_string(),
            })?;
        Ok(())
    }
}

/// In-memory storage for tests.
#[derive(Default)]
pub struct MockReleaseStorage {
    releases: std::sync::Mutex<BTreeMap<(String, String), Vec<StoredRelease>>>,
}

impl MockReleaseStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self, namespace: &str, name: &str) -> Vec<StoredRelease> {
        self.releases
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ReleaseStorage for MockReleaseStorage {
    async fn get_latest(&self, namespace: &str, name: &str) -> Result<Option<StoredRelease>> {
        Ok(self
            .history(namespace, name)
            .into_iter()
            .max_by_key(|release| release.version))
    }

    async fn create(&self, release: &StoredRelease) -> Result<()> {
        self.releases
            .lock()
            .unwrap()
            .entry((release.namespace.clone(), release.name.clone()))
            .or_default()
            .push(release.clone());
        Ok(())
    }

    async fn delete_all(&self, namespace: &str, name: &str) -> Result<()> {
        self.releases
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }
}
