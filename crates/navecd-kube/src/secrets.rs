//! Kubernetes-backed secret store
//!
//! Bridges the registry crate's [`SecretStore`] interface to cluster
//! secrets in the controller namespace.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::Api;

use navecd_registry::{RegistryError, SecretStore};

/// Reads credential secrets from a single namespace.
#[derive(Clone)]
pub struct KubeSecretStore {
    api: Api<Secret>,
}

impl KubeSecretStore {
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get(&self, name: &str) -> navecd_registry::Result<BTreeMap<String, Vec<u8>>> {
        let secret = self
            .api
            .get(name)
            .await
            .map_err(|err| RegistryError::Secret {
                name: name.to_string(),
                message: err.to_string(),
            })?;

        Ok(secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| (key, value.0))
            .collect())
    }
}
