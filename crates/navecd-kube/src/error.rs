//! Error types for cluster operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, KubeError>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Server-side apply refused the patch because another field manager
    /// owns conflicting fields.
    #[error("server-side apply conflict: {message}")]
    Conflict { message: String },

    /// The referenced object or resource type does not exist (yet).
    #[error("not found: {message}")]
    NotFound { message: String },

    /// Discovery cannot resolve the object's apiVersion/kind.
    #[error("unknown resource type: {api_version}/{kind}")]
    UnknownResourceType { api_version: String, kind: String },

    #[error("invalid object: {message}")]
    InvalidObject { message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("operation canceled")]
    Canceled,

    #[error("timed out after {seconds}s: {message}")]
    Timeout { seconds: u64, message: String },
}

impl KubeError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::UnknownResourceType { .. }
        )
    }
}
