//! Registry credential resolution
//!
//! Private registries are accessed either with a Kubernetes secret holding
//! `username`/`password` keys or through a cloud workload-identity
//! provider. The secret lookup goes through the [`SecretStore`] interface
//! so this crate stays independent of the cluster client; the cloud token
//! exchanges are an external collaborator behind [`WorkloadIdentity`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use navecd_core::{Auth, CloudProvider};

use crate::error::{RegistryError, Result};

/// Default endpoint of the Microsoft Azure login server. Azure
/// implementations of [`WorkloadIdentity`] honor an override for testing.
pub const DEFAULT_AZURE_LOGIN_URL: &str = "https://login.microsoftonline.com";

/// Default endpoint of the Google metadata server. GCP implementations of
/// [`WorkloadIdentity`] honor an override for testing.
pub const DEFAULT_GCP_METADATA_SERVER_URL: &str = "http://metadata.google.internal";

/// Username/password pair for a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

/// Read access to Kubernetes secrets in the controller namespace.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<BTreeMap<String, Vec<u8>>>;
}

/// Token acquisition from a cloud workload-identity provider.
///
/// The provider-specific exchanges (ECR authorization tokens, Azure
/// federated tokens and the ACR refresh-token exchange, GCP
/// metadata-server access tokens) live outside this crate. An
/// implementation receives the registry host and returns ready-to-use
/// credentials for it.
#[async_trait]
pub trait WorkloadIdentity: Send + Sync {
    async fn resolve(
        &self,
        provider: CloudProvider,
        host: &str,
    ) -> Result<RegistryCredentials>;
}

/// Credential lookup against an [`Auth`] declaration, object-safe so
/// consumers can hold `Arc<dyn CredentialSource>`.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn resolve_auth(&self, auth: &Auth, host: &str) -> Result<RegistryCredentials>;
}

#[async_trait]
impl<S: SecretStore> CredentialSource for CredentialResolver<S> {
    async fn resolve_auth(&self, auth: &Auth, host: &str) -> Result<RegistryCredentials> {
        self.resolve(auth, host).await
    }
}

/// Resolves [`Auth`] declarations into registry credentials.
pub struct CredentialResolver<S> {
    secrets: S,
    workload_identity: Option<Arc<dyn WorkloadIdentity>>,
}

impl<S: SecretStore> CredentialResolver<S> {
    pub fn new(secrets: S) -> Self {
        Self {
            secrets,
            workload_identity: None,
        }
    }

    pub fn with_workload_identity(mut self, provider: Arc<dyn WorkloadIdentity>) -> Self {
        self.workload_identity = Some(provider);
        self
    }

    /// Resolves credentials for `host` according to the declared auth.
    pub async fn resolve(&self, auth: &Auth, host: &str) -> Result<RegistryCredentials> {
        match auth {
            Auth::SecretRef { name } => self.from_secret(name).await,
            Auth::WorkloadIdentity { provider } => match &self.workload_identity {
                Some(identity) => identity.resolve(*provider, host).await,
                None => Err(RegistryError::WorkloadIdentity {
                    message: format!("no workload identity provider configured for {host}"),
                }),
            },
        }
    }

    async fn from_secret(&self, name: &str) -> Result<RegistryCredentials> {
        let data = self.secrets.get(name).await?;

        let read = |key: &str| -> Result<String> {
            let value = data
                .get(key)
                .ok_or_else(|| RegistryError::MissingCredentialKey {
                    name: name.to_string(),
                    key: key.to_string(),
                })?;
            String::from_utf8(value.clone()).map_err(|_| RegistryError::MissingCredentialKey {
                name: name.to_string(),
                key: key.to_string(),
            })
        };

        Ok(RegistryCredentials {
            username: read("username")?,
            password: read("password")?,
        })
    }
}

/// A provider returning fixed credentials per cloud, for tests.
#[derive(Default)]
pub struct MockWorkloadIdentity {
    credentials: std::sync::Mutex<BTreeMap<&'static str, RegistryCredentials>>,
    requests: std::sync::Mutex<Vec<(CloudProvider, String)>>,
}

impl MockWorkloadIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, provider: CloudProvider, username: &str, password: &str) {
        self.credentials.lock().unwrap().insert(
            provider_key(provider),
            RegistryCredentials {
                username: username.to_string(),
                password: password.to_string(),
            },
        );
    }

    /// The `(provider, host)` pairs this mock was asked to resolve.
    pub fn requests(&self) -> Vec<(CloudProvider, String)> {
        self.requests.lock().unwrap().clone()
    }
}

fn provider_key(provider: CloudProvider) -> &'static str {
    match provider {
        CloudProvider::Aws => "aws",
        CloudProvider::Azure => "azure",
        CloudProvider::Gcp => "gcp",
    }
}

#[async_trait]
impl WorkloadIdentity for MockWorkloadIdentity {
    async fn resolve(
        &self,
        provider: CloudProvider,
        host: &str,
    ) -> Result<RegistryCredentials> {
        self.requests
            .lock()
            .unwrap()
            .push((provider, host.to_string()));

        self.credentials
            .lock()
            .unwrap()
            .get(provider_key(provider))
            .cloned()
            .ok_or_else(|| RegistryError::WorkloadIdentity {
                message: format!("no {} credentials registered", provider_key(provider)),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticSecrets(BTreeMap<String, BTreeMap<String, Vec<u8>>>);

    #[async_trait]
    impl SecretStore for StaticSecrets {
        async fn get(&self, name: &str) -> Result<BTreeMap<String, Vec<u8>>> {
            self.0
                .get(name)
                .cloned()
                .ok_or_else(|| RegistryError::Secret {
                    name: name.to_string(),
                    message: "not found".to_string(),
                })
        }
    }

    fn resolver(
        secrets: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    ) -> CredentialResolver<StaticSecrets> {
        CredentialResolver::new(StaticSecrets(secrets))
    }

    #[tokio::test]
    async fn test_resolve_from_secret() {
        let mut data = BTreeMap::new();
        data.insert("username".to_string(), b"robot".to_vec());
        data.insert("password".to_string(), b"hunter2".to_vec());
        let resolver = resolver(BTreeMap::from([("repo-auth".to_string(), data)]));

        let creds = resolver
            .resolve(
                &Auth::SecretRef {
                    name: "repo-auth".to_string(),
                },
                "registry.example.com",
            )
            .await
            .unwrap();

        assert_eq!(creds.username, "robot");
        assert_eq!(creds.password, "hunter2");
    }

    #[tokio::test]
    async fn test_resolve_missing_key() {
        let mut data = BTreeMap::new();
        data.insert("username".to_string(), b"robot".to_vec());
        let resolver = resolver(BTreeMap::from([("repo-auth".to_string(), data)]));

        let err = resolver
            .resolve(
                &Auth::SecretRef {
                    name: "repo-auth".to_string(),
                },
                "registry.example.com",
            )
            .await
            .unwrap_err();

        assert!(
            matches!(err, RegistryError::MissingCredentialKey { key, .. } if key == "password")
        );
    }

    #[tokio::test]
    async fn test_resolve_via_workload_identity() {
        let identity = Arc::new(MockWorkloadIdentity::new());
        identity.put(CloudProvider::Gcp, "oauth2accesstoken", "token-123");

        let resolver =
            resolver(BTreeMap::new()).with_workload_identity(identity.clone());

        let creds = resolver
            .resolve(
                &Auth::WorkloadIdentity {
                    provider: CloudProvider::Gcp,
                },
                "europe-docker.pkg.dev",
            )
            .await
            .unwrap();

        assert_eq!(creds.username, "oauth2accesstoken");
        assert_eq!(creds.password, "token-123");
        assert_eq!(
            identity.requests(),
            vec![(CloudProvider::Gcp, "europe-docker.pkg.dev".to_string())]
        );
    }

    #[tokio::test]
    async fn test_workload_identity_without_provider_fails() {
        let resolver = resolver(BTreeMap::new());

        let err = resolver
            .resolve(
                &Auth::WorkloadIdentity {
                    provider: CloudProvider::Aws,
                },
                "123456789012.dkr.ecr.eu-central-1.amazonaws.com",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RegistryError::WorkloadIdentity { .. }));
    }

    #[tokio::test]
    async fn test_unregistered_provider_fails() {
        let identity = Arc::new(MockWorkloadIdentity::new());
        identity.put(CloudProvider::Gcp, "oauth2accesstoken", "token-123");

        let resolver = resolver(BTreeMap::new()).with_workload_identity(identity);

        let err = resolver
            .resolve(
                &Auth::WorkloadIdentity {
                    provider: CloudProvider::Azure,
                },
                "registry.azurecr.io",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RegistryError::WorkloadIdentity { .. }));
    }
}
