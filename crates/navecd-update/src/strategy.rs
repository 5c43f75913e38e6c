//! Version strategies
//!
//! A strategy decides whether any of the remote versions supersedes the
//! current one under a constraint.

use semver::{Version, VersionReq};

use crate::error::{Result, UpdateError};

/// The winning remote version of a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMatch {
    /// The greatest acceptable remote version, in its original spelling.
    pub latest: String,

    /// Whether `latest` is strictly greater than the current version.
    pub is_newer: bool,

    /// Index of `latest` within the remote version list, for metadata
    /// lookups.
    pub index: usize,
}

pub trait VersionStrategy: Send + Sync {
    /// Picks the greatest remote version acceptable under the strategy's
    /// constraint and compares it against `current`. `None` when no remote
    /// version is acceptable.
    fn has_newer_remote_version(
        &self,
        current: &str,
        remote_versions: &[String],
    ) -> Result<Option<VersionMatch>>;
}

/// Semantic versioning as defined in <https://semver.org/>.
pub struct SemVerStrategy {
    constraint: String,
}

impl SemVerStrategy {
    pub fn new(constraint: impl Into<String>) -> Self {
        Self {
            constraint: constraint.into(),
        }
    }

    fn requirement(&self) -> Result<VersionReq> {
        let constraint = self.constraint.trim();
        if constraint.is_empty() {
            return Ok(VersionReq::STAR);
        }
        VersionReq::parse(constraint).map_err(|err| UpdateError::InvalidConstraint {
            constraint: self.constraint.clone(),
            message: err.to_string(),
        })
    }
}

/// Accepts `v`-prefixed versions alongside plain semver.
fn parse_lenient(version: &str) -> Option<Version> {
    Version::parse(version.trim().trim_start_matches('v')).ok()
}

impl VersionStrategy for SemVerStrategy {
    fn has_newer_remote_version(
        &self,
        current: &str,
        remote_versions: &[String],
    ) -> Result<Option<VersionMatch>> {
        let requirement = self.requirement()?;

        let mut latest: Option<(Version, usize)> = None;
        for (index, remote) in remote_versions.iter().enumerate() {
            // Unparseable or constraint-violating versions are skipped.
            let Some(version) = parse_lenient(remote) else {
                continue;
            };
            if !requirement.matches(&version) {
                continue;
            }

            match &latest {
                Some((greatest, _)) if *greatest >= version => {}
                _ => latest = Some((version, index)),
            }
        }

        let Some((greatest, index)) = latest else {
            return Ok(None);
        };

        let current_version =
            parse_lenient(current).ok_or_else(|| UpdateError::InvalidCurrentVersion {
                version: current.to_string(),
                message: "not a semantic version".to_string(),
            })?;

        Ok(Some(VersionMatch {
            latest: remote_versions[index].clone(),
            is_newer: greatest > current_version,
            index,
        }))
    }
}
