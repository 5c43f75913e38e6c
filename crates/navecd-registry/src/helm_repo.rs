//! Helm chart acquisition
//!
//! Downloads charts from HTTPS repositories (via `index.yaml`) or OCI
//! registries into a local cache keyed by `<name>-<version>`. Cache hits
//! avoid the network entirely; writers stage into a temp directory and
//! atomically rename into place so concurrent readers never observe a
//! partial chart.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use navecd_core::{archive, Chart};

use crate::client::{RegistryAuth, RegistryClient};
use crate::credentials::RegistryCredentials;
use crate::error::{RegistryError, Result};
use crate::index::RepositoryIndex;

/// Helm chart media types in OCI registries.
pub mod media_types {
    pub const HELM_CONFIG: &str = "application/vnd.cncf.helm.config.v1+json";
    pub const HELM_CONTENT: &str = "application/vnd.cncf.helm.chart.content.v1.tar+gzip";
}

/// Fetches the `index.yaml` of an HTTPS Helm repository.
pub async fn fetch_index(
    http: &reqwest::Client,
    repo_url: &str,
    credentials: Option<&RegistryCredentials>,
) -> Result<RepositoryIndex> {
    let url = format!("{}/index.yaml", repo_url.trim_end_matches('/'));

    let mut request = http.get(&url);
    if let Some(creds) = credentials {
        request = request.basic_auth(&creds.username, Some(&creds.password));
    }

    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(RegistryError::UnexpectedResponse {
            url,
            status: response.status().as_u16(),
        });
    }

    let body = response.bytes().await?;
    RepositoryIndex::from_bytes(&body)
}

/// Downloads charts into a local cache.
pub struct ChartFetcher<C> {
    http: reqwest::Client,
    registry: C,
    cache_dir: PathBuf,
}

impl<C: RegistryClient> ChartFetcher<C> {
    pub fn new(registry: C, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            http: reqwest::Client::new(),
            registry,
            cache_dir: cache_dir.into(),
        }
    }

    /// The cache directory of a chart version.
    pub fn chart_dir(&self, chart: &Chart) -> PathBuf {
        self.cache_dir
            .join(format!("{}-{}", chart.name, chart.version))
    }

    /// Ensures the chart is present in the cache and returns its directory.
    pub async fn fetch(
        &self,
        chart: &Chart,
        credentials: Option<RegistryCredentials>,
    ) -> Result<PathBuf> {
        let chart_dir = self.chart_dir(chart);
        if chart_dir.exists() {
            debug!(chart = %chart.name, version = %chart.version, "Chart cache hit");
            return Ok(chart_dir);
        }

        let archive_data = if chart.is_oci() {
            self.pull_oci(chart, credentials).await?
        } else {
            self.download_http(chart, credentials).await?
        };

        self.unpack_into_cache(chart, &archive_data)?;
        info!(chart = %chart.name, version = %chart.version, "Cached chart");
        Ok(chart_dir)
    }

    async fn pull_oci(
        &self,
        chart: &Chart,
        credentials: Option<RegistryCredentials>,
    ) -> Result<Vec<u8>> {
        let repository = format!(
            "{}/{}",
            chart.repo_url.trim_start_matches("oci://").trim_end_matches('/'),
            chart.name
        );
        let auth: RegistryAuth = credentials.into();

        let manifest = self
            .registry
            .manifest(&repository, &chart.version, &auth)
            .await?;

        let layer = manifest
            .layers
            .iter()
            .find(|layer| layer.media_type == media_types::HELM_CONTENT)
            .ok_or_else(|| RegistryError::Oci {
                message: format!("no chart content layer found for {repository}"),
            })?;

        self.registry.pull_layer(&repository, layer, &auth).await
    }

    async fn download_http(
        &self,
        chart: &Chart,
        credentials: Option<RegistryCredentials>,
    ) -> Result<Vec<u8>> {
        let index = fetch_index(&self.http, &chart.repo_url, credentials.as_ref()).await?;

        let entry = index
            .versions(&chart.name, &chart.repo_url)?
            .iter()
            .find(|entry| entry.version == chart.version)
            .ok_or_else(|| RegistryError::ChartVersionError {
                name: chart.name.clone(),
                version: chart.version.clone(),
            })?;

        let url = entry.download_url(&chart.repo_url)?;
        let mut request = self.http.get(&url);
        if let Some(creds) = &credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(RegistryError::UnexpectedResponse {
                url,
                status: response.status().as_u16(),
            });
        }
        let data = response.bytes().await?.to_vec();

        if let Some(expected) = &entry.digest {
            verify_digest(&chart.name, expected, &data)?;
        }

        Ok(data)
    }

    fn unpack_into_cache(&self, chart: &Chart, archive_data: &[u8]) -> Result<()> {
        std::fs::create_dir_all(&self.cache_dir)?;

        let staging = self
            .cache_dir
            .join(format!(".{}-{}.tmp", chart.name, chart.version));
        if staging.exists() {
            std::fs::remove_dir_all(&staging)?;
        }
        std::fs::create_dir_all(&staging)?;

        let archive_path = staging.join("chart.tgz");
        std::fs::write(&archive_path, archive_data)?;
        archive::extract(&archive_path, &staging)?;
        std::fs::remove_file(&archive_path)?;

        // Chart archives contain a single top-level directory named after
        // the chart.
        let unpacked_root = staging.join(&chart.name);
        let source = if unpacked_root.is_dir() {
            unpacked_root
        } else {
            staging.clone()
        };

        let chart_dir = self.chart_dir(chart);
        match std::fs::rename(&source, &chart_dir) {
            Ok(()) => {}
            // Another writer won the race; their copy is equivalent.
            Err(err) if chart_dir.exists() => {
                debug!(chart = %chart.name, error = %err, "Chart cached concurrently");
            }
            Err(err) => return Err(err.into()),
        }

        if staging.exists() {
            let _ = std::fs::remove_dir_all(&staging);
        }
        Ok(())
    }
}

fn verify_digest(name: &str, expected: &str, data: &[u8]) -> Result<()> {
    let actual = format!("sha256:{}", hex::encode(Sha256::digest(data)));
    let normalize = |digest: &str| digest.trim().to_lowercase().replace("sha256:", "");

    if normalize(expected) != normalize(&actual) {
        return Err(RegistryError::IntegrityCheckFailed {
            name: name.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}
