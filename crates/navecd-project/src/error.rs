//! Error types for project reconciliation

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProjectError>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProjectError {
    #[error(transparent)]
    Core(#[from] navecd_core::CoreError),

    #[error("cluster error: {0}")]
    Kube(#[from] navecd_kube::KubeError),

    #[error("helm error: {0}")]
    Helm(#[from] navecd_helm::HelmError),

    #[error("load error: {0}")]
    Load(#[from] navecd_registry::RegistryError),

    #[error("could not load project: {message}")]
    LoadProject { message: String },

    #[error("could not compile package '{package}': {message}")]
    Compile { package: String, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("task failure: {message}")]
    Task { message: String },

    #[error("operation canceled")]
    Canceled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
