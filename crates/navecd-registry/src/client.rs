//! Low-level OCI registry client
//!
//! A thin trait over the registry transport so that the artifact loader,
//! the chart fetcher and the update scanner can share one client and tests
//! can substitute a mock.

use std::collections::BTreeMap;

use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol, Config, ImageLayer};
use oci_distribution::manifest::OciManifest;
use oci_distribution::secrets;
use oci_distribution::Reference;

use crate::credentials::RegistryCredentials;
use crate::error::{RegistryError, Result};

/// Media type of an OCI image manifest.
pub const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// Authentication against a registry.
#[derive(Debug, Clone, Default)]
pub enum RegistryAuth {
    #[default]
    Anonymous,
    Basic {
        username: String,
        password: String,
    },
}

impl From<Option<RegistryCredentials>> for RegistryAuth {
    fn from(credentials: Option<RegistryCredentials>) -> Self {
        match credentials {
            Some(creds) => Self::Basic {
                username: creds.username,
                password: creds.password,
            },
            None => Self::Anonymous,
        }
    }
}

impl RegistryAuth {
    fn to_oci(&self) -> secrets::RegistryAuth {
        match self {
            Self::Anonymous => secrets::RegistryAuth::Anonymous,
            Self::Basic { username, password } => {
                secrets::RegistryAuth::Basic(username.clone(), password.clone())
            }
        }
    }
}

/// A content layer referenced by a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerRef {
    pub media_type: String,
    pub digest: String,
    pub size: i64,
}

/// Metadata of a remote image manifest.
#[derive(Debug, Clone, Default)]
pub struct RemoteManifest {
    /// The manifest digest (`sha256:<hex>`); the artifact's identity.
    pub digest: String,
    pub media_type: String,
    pub config_media_type: String,
    pub layers: Vec<LayerRef>,
    pub annotations: BTreeMap<String, String>,
}

/// Registry transport operations needed by Navecd.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Lists all tags of a repository.
    async fn list_tags(&self, repository: &str, auth: &RegistryAuth) -> Result<Vec<String>>;

    /// Fetches the manifest of `repository:reference` without downloading
    /// any layer.
    async fn manifest(
        &self,
        repository: &str,
        reference: &str,
        auth: &RegistryAuth,
    ) -> Result<RemoteManifest>;

    /// Downloads a single content layer.
    async fn pull_layer(
        &self,
        repository: &str,
        layer: &LayerRef,
        auth: &RegistryAuth,
    ) -> Result<Vec<u8>>;

    /// Publishes a single-layer image and returns its manifest digest.
    async fn push(
        &self,
        repository: &str,
        reference: &str,
        config_media_type: &str,
        layer_media_type: &str,
        layer: Vec<u8>,
        auth: &RegistryAuth,
    ) -> Result<String>;
}

#[async_trait]
impl<T: RegistryClient + ?Sized> RegistryClient for std::sync::Arc<T> {
    async fn list_tags(&self, repository: &str, auth: &RegistryAuth) -> Result<Vec<String>> {
        (**self).list_tags(repository, auth).await
    }

    async fn manifest(
        &self,
        repository: &str,
        reference: &str,
        auth: &RegistryAuth,
    ) -> Result<RemoteManifest> {
        (**self).manifest(repository, reference, auth).await
    }

    async fn pull_layer(
        &self,
        repository: &str,
        layer: &LayerRef,
        auth: &RegistryAuth,
    ) -> Result<Vec<u8>> {
        (**self).pull_layer(repository, layer, auth).await
    }

    async fn push(
        &self,
        repository: &str,
        reference: &str,
        config_media_type: &str,
        layer_media_type: &str,
        layer: Vec<u8>,
        auth: &RegistryAuth,
    ) -> Result<String> {
        (**self)
            .push(
                repository,
                reference,
                config_media_type,
                layer_media_type,
                layer,
                auth,
            )
            .await
    }
}

/// `oci-distribution` backed registry client.
pub struct DistributionClient {
    client: oci_distribution::Client,
}

impl DistributionClient {
    pub fn new(insecure: bool) -> Self {
        let protocol = if insecure {
            ClientProtocol::Http
        } else {
            ClientProtocol::Https
        };
        let config = ClientConfig {
            protocol,
            ..Default::default()
        };
        Self {
            client: oci_distribution::Client::new(config),
        }
    }

    fn reference(repository: &str, tag: &str) -> Result<Reference> {
        let clean = repository.trim_start_matches("oci://");
        Reference::try_from(format!("{clean}:{tag}")).map_err(|err| {
            RegistryError::InvalidReference {
                reference: format!("{clean}:{tag}"),
                message: err.to_string(),
            }
        })
    }
}

impl Default for DistributionClient {
    fn default() -> Self {
        Self::new(false)
    }
}

#[async_trait]
impl RegistryClient for DistributionClient {
    async fn list_tags(&self, repository: &str, auth: &RegistryAuth) -> Result<Vec<String>> {
        let reference = Self::reference(repository, "latest")?;
        let response = self
            .client
            .list_tags(&reference, &auth.to_oci(), None, None)
            .await
            .map_err(|err| RegistryError::Oci {
                message: format!("failed to list tags: {err}"),
            })?;
        Ok(response.tags)
    }

    async fn manifest(
        &self,
        repository: &str,
        reference: &str,
        auth: &RegistryAuth,
    ) -> Result<RemoteManifest> {
        let reference = Self::reference(repository, reference)?;
        let (manifest, digest) = self
            .client
            .pull_manifest(&reference, &auth.to_oci())
            .await
            .map_err(|err| RegistryError::Oci {
                message: format!("failed to fetch manifest: {err}"),
            })?;

        match manifest {
            OciManifest::Image(image) => Ok(RemoteManifest {
                digest,
                media_type: image
                    .media_type
                    .unwrap_or_else(|| OCI_MANIFEST_MEDIA_TYPE.to_string()),
                config_media_type: image.config.media_type,
                layers: image
                    .layers
                    .into_iter()
                    .map(|layer| LayerRef {
                        media_type: layer.media_type,
                        digest: layer.digest,
                        size: layer.size,
                    })
                    .collect(),
                annotations: image
                    .annotations
                    .map(|annotations| annotations.into_iter().collect())
                    .unwrap_or_default(),
            }),
            OciManifest::ImageIndex(_) => Err(RegistryError::WrongMediaType {
                got: "image index".to_string(),
                wanted: OCI_MANIFEST_MEDIA_TYPE.to_string(),
            }),
        }
    }

    async fn pull_layer(
        &self,
        repository: &str,
        layer: &LayerRef,
        auth: &RegistryAuth,
    ) -> Result<Vec<u8>> {
        let reference = Self::reference(repository, "latest")?;
        // Authenticate against the repository before fetching blobs.
        let descriptor = oci_distribution::manifest::OciDescriptor {
            media_type: layer.media_type.clone(),
            digest: layer.digest.clone(),
            size: layer.size,
            ..Default::default()
        };

        let mut data = Vec::new();
        self.client
            .auth(
                &reference,
                &auth.to_oci(),
                oci_distribution::RegistryOperation::Pull,
            )
            .await
            .map_err(|err| RegistryError::Oci {
                message: format!("registry authentication failed: {err}"),
            })?;
        self.client
            .pull_blob(&reference, &descriptor, &mut data)
            .await
            .map_err(|err| RegistryError::Oci {
                message: format!("failed to pull layer {}: {err}", layer.digest),
            })?;
        Ok(data)
    }

    async fn push(
        &self,
        repository: &str,
        reference: &str,
        config_media_type: &str,
        layer_media_type: &str,
        layer: Vec<u8>,
        auth: &RegistryAuth,
    ) -> Result<String> {
        let reference = Self::reference(repository, reference)?;
        let layers = vec![ImageLayer {
            data: layer,
            media_type: layer_media_type.to_string(),
            annotations: None,
        }];
        let config = Config {
            data: b"{}".to_vec(),
            media_type: config_media_type.to_string(),
            annotations: None,
        };

        self.client
            .push(&reference, &layers, config, &auth.to_oci(), None)
            .await
            .map_err(|err| RegistryError::Oci {
                message: format!("failed to push image: {err}"),
            })?;

        // The push response carries urls, not the digest; fetch it back.
        self.client
            .fetch_manifest_digest(&reference, &auth.to_oci())
            .await
            .map_err(|err| RegistryError::Oci {
                message: format!("failed to resolve pushed digest: {err}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_strips_oci_scheme() {
        let reference =
            DistributionClient::reference("oci://ghcr.io/org/project", "v1.0.0").unwrap();
        assert_eq!(reference.registry(), "ghcr.io");
        assert_eq!(reference.repository(), "org/project");
        assert_eq!(reference.tag(), Some("v1.0.0"));
    }

    #[test]
    fn test_reference_invalid() {
        let err = DistributionClient::reference("not a reference", "tag");
        assert!(err.is_err());
    }

    #[test]
    fn test_auth_from_credentials() {
        let auth: RegistryAuth = Some(RegistryCredentials {
            username: "user".to_string(),
            password: "pass".to_string(),
        })
        .into();
        assert!(matches!(auth, RegistryAuth::Basic { .. }));

        let anonymous: RegistryAuth = None.into();
        assert!(matches!(anonymous, RegistryAuth::Anonymous));
    }
}
