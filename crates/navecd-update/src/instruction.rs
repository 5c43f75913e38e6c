//! Update instructions
//!
//! The configuration compiler inspects image and chart literals for update
//! annotations and emits one instruction per annotated literal. Each
//! instruction names its target, the version constraint, a cron schedule
//! and the exact file location of the version token to rewrite.

use serde::{Deserialize, Serialize};

use navecd_core::{Auth, Chart};

use crate::error::{Result, UpdateError};

/// How an accepted update reaches the source of truth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateIntegration {
    /// Commit directly to the configured branch.
    #[default]
    DirectPush,

    /// Commit to an update branch and open a pull request.
    PullRequest,
}

/// The strategy deciding whether a remote version supersedes the current
/// one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateStrategy {
    #[default]
    SemVer,
}

/// What is being updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateTarget {
    /// A container image reference, e.g. `ghcr.io/org/app:1.2.3`.
    Container { image: String },

    /// A Helm chart.
    Chart { chart: Chart },
}

impl UpdateTarget {
    /// A name unique within a project, used for cron job identity.
    pub fn name(&self) -> String {
        match self {
            UpdateTarget::Container { image } => {
                let (repository, _, _) = split_image(image);
                repository
            }
            UpdateTarget::Chart { chart } => chart.name.clone(),
        }
    }
}

/// One scheduled version scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInstruction {
    #[serde(default)]
    pub strategy: UpdateStrategy,

    /// Version constraint, e.g. `>=1.0.0, <2.0.0`. Empty accepts any
    /// version.
    #[serde(default)]
    pub constraint: String,

    #[serde(default)]
    pub integration: UpdateIntegration,

    /// Cron expression. Empty means the instruction is not scheduled.
    #[serde(default)]
    pub schedule: String,

    /// File holding the version token, relative to the project root.
    pub file: String,

    /// 1-based line number of the version token.
    pub line: usize,

    pub target: UpdateTarget,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
}

impl UpdateInstruction {
    pub fn is_scheduled(&self) -> bool {
        !self.schedule.trim().is_empty()
    }
}

/// Splits an image reference into `(repository, tag, digest)`.
pub fn split_image(image: &str) -> (String, String, String) {
    let (without_digest, digest) = match image.split_once('@') {
        Some((reference, digest)) => (reference, digest.to_string()),
        None => (image, String::new()),
    };

    // The tag separator is the last ':' after the final '/'; a ':' before
    // that belongs to a registry port.
    let slash = without_digest.rfind('/').map(|idx| idx + 1).unwrap_or(0);
    match without_digest[slash..].rfind(':') {
        Some(colon) => {
            let colon = slash + colon;
            (
                without_digest[..colon].to_string(),
                without_digest[colon + 1..].to_string(),
                digest,
            )
        }
        None => (without_digest.to_string(), String::new(), digest),
    }
}

/// Parses an image reference, requiring a tag.
pub fn parse_image(image: &str) -> Result<(String, String, String)> {
    let (repository, tag, digest) = split_image(image);
    if repository.is_empty() || tag.is_empty() {
        return Err(UpdateError::InvalidImage {
            image: image.to_string(),
            message: "expected <repository>:<tag>".to_string(),
        });
    }
    Ok((repository, tag, digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_image_with_tag() {
        let (repo, tag, digest) = split_image("ghcr.io/org/app:1.2.3");
        assert_eq!(repo, "ghcr.io/org/app");
        assert_eq!(tag, "1.2.3");
        assert!(digest.is_empty());
    }

    #[test]
    fn test_split_image_with_digest() {
        let (repo, tag, digest) = split_image("ghcr.io/org/app:1.2.3@sha256:abc");
        assert_eq!(repo, "ghcr.io/org/app");
        assert_eq!(tag, "1.2.3");
        assert_eq!(digest, "sha256:abc");
    }

    #[test]
    fn test_split_image_with_registry_port() {
        let (repo, tag, _) = split_image("localhost:5000/app:2.0.0");
        assert_eq!(repo, "localhost:5000/app");
        assert_eq!(tag, "2.0.0");
    }

    #[test]
    fn test_parse_image_requires_tag() {
        assert!(parse_image("ghcr.io/org/app").is_err());
        assert!(parse_image("ghcr.io/org/app:1.0.0").is_ok());
    }

    #[test]
    fn test_target_name() {
        let container = UpdateTarget::Container {
            image: "ghcr.io/org/app:1.2.3".to_string(),
        };
        assert_eq!(container.name(), "ghcr.io/org/app");

        let chart = UpdateTarget::Chart {
            chart: Chart {
                name: "prometheus".to_string(),
                repo_url: "https://charts.example.com".to_string(),
                version: "25.0.0".to_string(),
                auth: None,
            },
        };
        assert_eq!(chart.name(), "prometheus");
    }

    #[test]
    fn test_is_scheduled() {
        let mut instruction = UpdateInstruction {
            strategy: UpdateStrategy::SemVer,
            constraint: String::new(),
            integration: UpdateIntegration::DirectPush,
            schedule: String::new(),
            file: "apps/app.cue".to_string(),
            line: 12,
            target: UpdateTarget::Container {
                image: "ghcr.io/org/app:1.0.0".to_string(),
            },
            auth: None,
        };
        assert!(!instruction.is_scheduled());

        instruction.schedule = "0 * * * *".to_string();
        assert!(instruction.is_scheduled());
    }
}
