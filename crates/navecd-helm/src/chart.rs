//! Loaded chart representation
//!
//! A chart is a directory in the local cache. Loading parses `Chart.yaml`
//! and collects the CRDs shipped in `crds/`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HelmError, Result};

/// Parsed `Chart.yaml` metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    pub name: String,
    pub version: String,

    #[serde(default)]
    pub api_version: Option<String>,

    #[serde(default)]
    pub app_version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,
}

/// A chart unpacked into the local cache.
#[derive(Debug, Clone)]
pub struct LoadedChart {
    pub path: PathBuf,
    pub metadata: ChartMetadata,

    /// CRD objects shipped in the chart's `crds/` directory.
    pub crds: Vec<Value>,
}

impl LoadedChart {
    pub fn load(path: &Path) -> Result<Self> {
        let chart_yaml = path.join("Chart.yaml");
        let raw = std::fs::read_to_string(&chart_yaml).map_err(|err| HelmError::InvalidChart {
            path: path.display().to_string(),
            message: format!("unable to read Chart.yaml: {err}"),
        })?;
        let metadata: ChartMetadata =
            serde_yaml::from_str(&raw).map_err(|err| HelmError::InvalidChart {
                path: path.display().to_string(),
                message: format!("invalid Chart.yaml: {err}"),
            })?;

        let crds = load_crds(&path.join("crds"))?;

        Ok(Self {
            path: path.to_path_buf(),
            metadata,
            crds,
        })
    }
}

fn load_crds(crds_dir: &Path) -> Result<Vec<Value>> {
    if !crds_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(crds_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some("yaml") | Some("yml")
            )
        })
        .collect();
    files.sort();

    let mut crds = Vec::new();
    for file in files {
        let raw = std::fs::read_to_string(&file)?;
        for document in raw.split("\n---") {
            let document = document.trim();
            if document.is_empty() {
                continue;
            }
            let value: Value = serde_yaml::from_str::<serde_yaml::Value>(document)
                .ok()
                .and_then(|yaml| serde_json::to_value(yaml).ok())
                .unwrap_or(Value::Null);

            if value.get("kind").and_then(Value::as_str) == Some("CustomResourceDefinition") {
                crds.push(value);
            }
        }
    }
    Ok(crds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_chart(dir: &Path, with_crds: bool) {
        std::fs::create_dir_all(dir.join("templates")).unwrap();
        std::fs::write(
            dir.join("Chart.yaml"),
            "apiVersion: v2\nname: widget-operator\nversion: 1.2.3\nappVersion: \"2.0\"\n",
        )
        .unwrap();

        if with_crds {
            std::fs::create_dir_all(dir.join("crds")).unwrap();
            std::fs::write(
                dir.join("crds").join("widgets.yaml"),
                r#"apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: widgets.example.com
spec:
  group: example.com
---
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: gadgets.example.com
spec:
  group: example.com
"#,
            )
            .unwrap();
        }
    }

    #[test]
    fn test_load_chart_metadata() {
        let temp = TempDir::new().unwrap();
        write_chart(temp.path(), false);

        let chart = LoadedChart::load(temp.path()).unwrap();
        assert_eq!(chart.metadata.name, "widget-operator");
        assert_eq!(chart.metadata.version, "1.2.3");
        assert!(chart.crds.is_empty());
    }

    #[test]
    fn test_load_packaged_crds() {
        let temp = TempDir::new().unwrap();
        write_chart(temp.path(), true);

        let chart = LoadedChart::load(temp.path()).unwrap();
        assert_eq!(chart.crds.len(), 2);
        assert_eq!(
            chart.crds[0].pointer("/metadata/name").unwrap(),
            "widgets.example.com"
        );
    }

    #[test]
    fn test_missing_chart_yaml() {
        let temp = TempDir::new().unwrap();
        let err = LoadedChart::load(temp.path()).unwrap_err();
        assert!(matches!(err, HelmError::InvalidChart { .. }));
    }
}
