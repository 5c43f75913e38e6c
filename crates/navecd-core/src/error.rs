//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("component '{id}' is already part of the dependency graph")]
    DuplicateComponent { id: String },

    #[error("component '{id}' depends on unknown component '{dependency}'")]
    UnknownDependency { id: String, dependency: String },

    #[error("dependency cycle detected: {}", cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },

    #[error("inventory key '{key}' is incorrect: {reason}")]
    WrongInventoryKey { key: String, reason: String },

    #[error("manifest field '{field}' not found in inventory item '{key}'")]
    ManifestFieldNotFound { key: String, field: String },

    #[error("manifest is missing required field: {field}")]
    MissingField { field: String },

    #[error("archive error: {message}")]
    Archive { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
