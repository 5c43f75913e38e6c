//! Navecd Registry - remote artifact and chart access
//!
//! This crate talks to the outside world:
//! - `artifact`: push/load of project artifacts with atomic swap semantics
//! - `client`: the low-level OCI registry transport interface
//! - `helm_repo`: Helm chart acquisition (HTTPS index + OCI) with caching
//! - `index`: the Helm `index.yaml` model
//! - `credentials`: secret-backed and workload-identity registry auth
//! - `mock`: an in-memory registry for tests

pub mod artifact;
pub mod client;
pub mod credentials;
pub mod error;
pub mod helm_repo;
pub mod index;
pub mod mock;

pub use artifact::{backup_path, ProjectClient, CONFIG_MEDIA_TYPE, CONTENT_LAYER_MEDIA_TYPE};
pub use client::{
    DistributionClient, LayerRef, RegistryAuth, RegistryClient, RemoteManifest,
    OCI_MANIFEST_MEDIA_TYPE,
};
pub use credentials::{
    CredentialResolver, CredentialSource, MockWorkloadIdentity, RegistryCredentials, SecretStore,
    WorkloadIdentity, DEFAULT_AZURE_LOGIN_URL, DEFAULT_GCP_METADATA_SERVER_URL,
};
pub use error::{RegistryError, Result};
pub use helm_repo::{fetch_index, ChartFetcher};
pub use index::{ChartEntry, RepositoryIndex};
pub use mock::MockRegistryClient;
