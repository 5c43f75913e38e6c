//! Error types for Helm release reconciliation

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HelmError>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HelmError {
    #[error("chart error: {0}")]
    Chart(#[from] navecd_registry::RegistryError),

    #[error("cluster error: {0}")]
    Kube(#[from] navecd_kube::KubeError),

    #[error("inventory error: {0}")]
    Inventory(#[from] navecd_core::CoreError),

    #[error("invalid chart at {path}: {message}")]
    InvalidChart { path: String, message: String },

    #[error("template error for release '{release}': {message}")]
    Template { release: String, message: String },

    #[error("release '{name}' not found in namespace '{namespace}'")]
    ReleaseNotFound { name: String, namespace: String },

    #[error("storage error: {message}")]
    Storage { message: String },

    #[error("rendered manifest has no metadata: {message}")]
    ManifestNoMetadata { message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
