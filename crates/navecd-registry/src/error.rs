//! Error types for registry operations

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("wrong media type: got {got}, wanted {wanted}")]
    WrongMediaType { got: String, wanted: String },

    #[error("recoverable load error: {source}")]
    Recoverable {
        /// Directory mirroring the tree shape of the target before the
        /// load started. Structure only; files are empty placeholders.
        backup_path: PathBuf,
        #[source]
        source: Box<RegistryError>,
    },

    #[error("unrecoverable load error: {source}")]
    Unrecoverable {
        #[source]
        source: Box<RegistryError>,
    },

    #[error("OCI registry error: {message}")]
    Oci { message: String },

    #[error("invalid registry reference '{reference}': {message}")]
    InvalidReference { reference: String, message: String },

    #[error("chart '{name}' not found in repository {repo}")]
    ChartNotFound { name: String, repo: String },

    #[error("chart version error: {name} has no version {version}")]
    ChartVersionError { name: String, version: String },

    #[error("helm chart '{name}' does not provide download urls")]
    NoChartUrls { name: String },

    #[error("failed to parse repository index: {message}")]
    IndexParse { message: String },

    #[error("integrity check failed for {name}: expected {expected}, got {actual}")]
    IntegrityCheckFailed {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("unexpected response from {url}: status {status}")]
    UnexpectedResponse { url: String, status: u16 },

    #[error("secret '{name}' is missing credential key '{key}'")]
    MissingCredentialKey { name: String, key: String },

    #[error("failed to read secret '{name}': {message}")]
    Secret { name: String, message: String },

    #[error("workload identity error: {message}")]
    WorkloadIdentity { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] navecd_core::CoreError),

    #[error("failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl RegistryError {
    /// Wraps the error as recoverable, pointing at the fallback state.
    pub fn recoverable(self, backup_path: PathBuf) -> Self {
        Self::Recoverable {
            backup_path,
            source: Box::new(self),
        }
    }

    /// Wraps the error as unrecoverable.
    pub fn unrecoverable(self) -> Self {
        Self::Unrecoverable {
            source: Box::new(self),
        }
    }

    /// Whether the artifact load can fall back to the previous project
    /// state and be retried on a later tick.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Recoverable { .. })
    }

    /// The backup path carried by a recoverable load error.
    pub fn backup_path(&self) -> Option<&PathBuf> {
        match self {
            Self::Recoverable { backup_path, .. } => Some(backup_path),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
