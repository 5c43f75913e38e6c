//! Error types for update scanning and scheduling

use thiserror::Error;

pub type Result<T> = std::result::Result<T, UpdateError>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UpdateError {
    #[error("registry error: {0}")]
    Registry(#[from] navecd_registry::RegistryError),

    #[error("invalid version constraint '{constraint}': {message}")]
    InvalidConstraint { constraint: String, message: String },

    #[error("current version '{version}' is not parseable: {message}")]
    InvalidCurrentVersion { version: String, message: String },

    #[error("invalid image reference '{image}': {message}")]
    InvalidImage { image: String, message: String },

    #[error("invalid cron schedule '{schedule}': {message}")]
    InvalidSchedule { schedule: String, message: String },

    #[error("version token '{token}' not found at {file}:{line}")]
    VersionTokenNotFound {
        file: String,
        line: usize,
        token: String,
    },

    #[error("VCS error: {message}")]
    Vcs { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
