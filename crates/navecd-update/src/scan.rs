//! Registry version scanning
//!
//! Contacts image registries and chart repositories to list remote
//! versions and asks the strategy whether the greatest acceptable one
//! supersedes the current version.

use std::sync::Arc;

use tracing::debug;

use navecd_registry::{
    fetch_index, CredentialSource, RegistryAuth, RegistryClient, RegistryCredentials,
};

use crate::error::Result;
use crate::instruction::{parse_image, UpdateInstruction, UpdateTarget};
use crate::strategy::{SemVerStrategy, VersionMatch, VersionStrategy};

/// OCI annotation holding an info URL for an image.
const ANNOTATION_URL: &str = "org.opencontainers.image.url";

/// The result of a positive scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageScan {
    /// Format `tag` or `tag@digest`.
    pub current_version: String,

    /// Format `tag` or `tag@digest`.
    pub new_version: String,

    /// URL with more information on the package, when available.
    pub url: String,
}

/// Scans update targets for newer versions.
pub struct Scanner {
    pub registry: Arc<dyn RegistryClient>,
    pub http: reqwest::Client,
    pub credentials: Option<Arc<dyn CredentialSource>>,
}

struct RemotePackage {
    current_version: String,
    current_digest: String,
    versions: Vec<String>,
}

impl Scanner {
    /// Scans the instruction's target. `Ok(None)` when the current version
    /// is already the greatest acceptable one.
    pub async fn scan(&self, instruction: &UpdateInstruction) -> Result<Option<ImageScan>> {
        let strategy = match instruction.strategy {
            crate::instruction::UpdateStrategy::SemVer => {
                SemVerStrategy::new(instruction.constraint.clone())
            }
        };

        match &instruction.target {
            UpdateTarget::Container { image } => {
                let (repository, tag, digest) = parse_image(image)?;
                let auth = self.resolve(instruction, host_of(&repository)).await?;
                let versions = self.registry.list_tags(&repository, &auth).await?;

                let package = RemotePackage {
                    current_version: tag,
                    current_digest: digest,
                    versions,
                };
                self.evaluate_oci(&strategy, &repository, &auth, package)
                    .await
            }
            UpdateTarget::Chart { chart } if chart.is_oci() => {
                let repository = format!(
                    "{}/{}",
                    chart.repo_url.trim_start_matches("oci://").trim_end_matches('/'),
                    chart.name
                );
                let auth = self.resolve(instruction, host_of(&repository)).await?;
                let versions = self.registry.list_tags(&repository, &auth).await?;

                let package = RemotePackage {
                    current_version: chart.version.clone(),
                    current_digest: String::new(),
                    versions,
                };
                self.evaluate_oci(&strategy, &repository, &auth, package)
                    .await
            }
            UpdateTarget::Chart { chart } => {
                let credentials = self
                    .resolve_credentials(instruction, host_of(&chart.repo_url))
                    .await?;
                let index =
                    fetch_index(&self.http, &chart.repo_url, credentials.as_ref()).await?;
                let entries = index.versions(&chart.name, &chart.repo_url)?;

                let versions: Vec<String> =
                    entries.iter().map(|entry| entry.version.clone()).collect();
                let Some(result) =
                    strategy.has_newer_remote_version(&chart.version, &versions)?
                else {
                    return Ok(None);
                };
                if !result.is_newer {
                    debug!(chart = %chart.name, "No newer chart version");
                    return Ok(None);
                }

                let entry = &entries[result.index];
                Ok(Some(ImageScan {
                    current_version: chart.version.clone(),
                    new_version: result.latest,
                    url: entry.home.clone().unwrap_or_default(),
                }))
            }
        }
    }

    async fn evaluate_oci(
        &self,
        strategy: &SemVerStrategy,
        repository: &str,
        auth: &RegistryAuth,
        package: RemotePackage,
    ) -> Result<Option<ImageScan>> {
        let Some(VersionMatch {
            latest,
            is_newer,
            index: _,
        }) = strategy.has_newer_remote_version(&package.current_version, &package.versions)?
        else {
            return Ok(None);
        };
        if !is_newer {
            debug!(repository, "No newer remote version");
            return Ok(None);
        }

        let manifest = self.registry.manifest(repository, &latest, auth).await?;
        let url = manifest
            .annotations
            .get(ANNOTATION_URL)
            .cloned()
            .unwrap_or_default();

        let (current_version, new_version) = if package.current_digest.is_empty() {
            (package.current_version, latest)
        } else {
            (
                format!("{}@{}", package.current_version, package.current_digest),
                format!("{latest}@{}", manifest.digest),
            )
        };

        Ok(Some(ImageScan {
            current_version,
            new_version,
            url,
        }))
    }

    async fn resolve(
        &self,
        instruction: &UpdateInstruction,
        host: &str,
    ) -> Result<RegistryAuth> {
        Ok(self.resolve_credentials(instruction, host).await?.into())
    }

    async fn resolve_credentials(
        &self,
        instruction: &UpdateInstruction,
        host: &str,
    ) -> Result<Option<RegistryCredentials>> {
        let Some(auth) = &instruction.auth else {
            return Ok(None);
        };
        let Some(resolver) = &self.credentials else {
            return Ok(None);
        };
        Ok(Some(resolver.resolve_auth(auth, host).await?))
    }
}

fn host_of(repository: &str) -> &str {
    repository
        .trim_start_matches("oci://")
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or("")
}
