//! Helm repository index types
//!
//! Helm-compatible `index.yaml` model, reduced to what chart acquisition
//! and update scanning need.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};

/// A parsed `index.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryIndex {
    #[serde(default)]
    pub api_version: String,

    #[serde(default)]
    pub generated: Option<DateTime<Utc>>,

    /// Chart versions indexed by chart name.
    #[serde(default)]
    pub entries: HashMap<String, Vec<ChartEntry>>,
}

impl RepositoryIndex {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|err| RegistryError::IndexParse {
            message: err.to_string(),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let yaml = std::str::from_utf8(bytes).map_err(|err| RegistryError::IndexParse {
            message: format!("invalid UTF-8: {err}"),
        })?;
        Self::from_yaml(yaml)
    }

    /// All versions of a chart, or [`RegistryError::ChartNotFound`].
    pub fn versions(&self, name: &str, repo: &str) -> Result<&[ChartEntry]> {
        self.entries
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| RegistryError::ChartNotFound {
                name: name.to_string(),
                repo: repo.to_string(),
            })
    }

    /// The entry matching name and exact version.
    pub fn get_version(&self, name: &str, version: &str) -> Option<&ChartEntry> {
        self.entries
            .get(name)?
            .iter()
            .find(|entry| entry.version == version)
    }
}

/// One chart version in the index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartEntry {
    pub name: String,
    pub version: String,

    #[serde(default)]
    pub app_version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub home: Option<String>,

    /// URLs to download the chart archive; may be relative to the
    /// repository URL.
    #[serde(default)]
    pub urls: Vec<String>,

    /// SHA256 digest of the archive.
    #[serde(default)]
    pub digest: Option<String>,

    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

impl ChartEntry {
    /// The primary download URL resolved against the repository URL.
    pub fn download_url(&self, repo_url: &str) -> Result<String> {
        let url = self
            .urls
            .first()
            .ok_or_else(|| RegistryError::NoChartUrls {
                name: self.name.clone(),
            })?;

        if url.starts_with("http://") || url.starts_with("https://") {
            Ok(url.clone())
        } else {
            Ok(format!("{}/{}", repo_url.trim_end_matches('/'), url))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> RepositoryIndex {
        RepositoryIndex::from_yaml(
            r#"
apiVersion: v1
generated: "2024-01-01T00:00:00Z"
entries:
  prometheus:
    - name: prometheus
      version: "25.0.1"
      appVersion: "2.47.0"
      urls:
        - https://charts.example.com/prometheus-25.0.1.tgz
      digest: "sha256:abc123"
    - name: prometheus
      version: "24.3.0"
      urls:
        - prometheus-24.3.0.tgz
  grafana:
    - name: grafana
      version: "7.0.0"
      home: https://grafana.com
      urls:
        - https://charts.example.com/grafana-7.0.0.tgz
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_index() {
        let index = sample_index();
        assert_eq!(index.entries.len(), 2);
        assert_eq!(index.entries["prometheus"].len(), 2);
    }

    #[test]
    fn test_get_version() {
        let index = sample_index();
        let entry = index.get_version("prometheus", "25.0.1").unwrap();
        assert_eq!(entry.app_version.as_deref(), Some("2.47.0"));
        assert!(index.get_version("prometheus", "99.0.0").is_none());
    }

    #[test]
    fn test_versions_unknown_chart() {
        let index = sample_index();
        let err = index
            .versions("postgres", "https://charts.example.com")
            .unwrap_err();
        assert!(matches!(err, RegistryError::ChartNotFound { .. }));
    }

    #[test]
    fn test_download_url_absolute() {
        let index = sample_index();
        let entry = index.get_version("prometheus", "25.0.1").unwrap();
        assert_eq!(
            entry.download_url("https://charts.example.com").unwrap(),
            "https://charts.example.com/prometheus-25.0.1.tgz"
        );
    }

    #[test]
    fn test_download_url_relative() {
        let index = sample_index();
        let entry = index.get_version("prometheus", "24.3.0").unwrap();
        assert_eq!(
            entry.download_url("https://charts.example.com/").unwrap(),
            "https://charts.example.com/prometheus-24.3.0.tgz"
        );
    }

    #[test]
    fn test_download_url_missing() {
        let entry = ChartEntry {
            name: "empty".to_string(),
            version: "1.0.0".to_string(),
            ..Default::default()
        };
        let err = entry.download_url("https://charts.example.com").unwrap_err();
        assert!(matches!(err, RegistryError::NoChartUrls { .. }));
    }
}
