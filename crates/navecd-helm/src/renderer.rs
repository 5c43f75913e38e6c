//! Chart rendering interface
//!
//! Template rendering is an external collaborator: the engine receives the
//! unpacked chart and the release declaration and produces the manifests
//! Helm would install. Tests use [`StaticRenderer`].

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use navecd_core::ReleaseDeclaration;

use crate::error::Result;

/// Renders a chart into the list of manifests to apply.
#[async_trait]
pub trait ChartRenderer: Send + Sync {
    async fn render(&self, chart_dir: &Path, release: &ReleaseDeclaration) -> Result<Vec<Value>>;
}

/// A renderer returning a fixed manifest list per release name, for tests.
#[derive(Default)]
pub struct StaticRenderer {
    manifests: std::sync::Mutex<std::collections::HashMap<String, Vec<Value>>>,
}

impl StaticRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_manifests(&self, release_name: &str, manifests: Vec<Value>) {
        self.manifests
            .lock()
            .unwrap()
            .insert(release_name.to_string(), manifests);
    }
}

#[async_trait]
impl ChartRenderer for StaticRenderer {
    async fn render(&self, _chart_dir: &Path, release: &ReleaseDeclaration) -> Result<Vec<Value>> {
        Ok(self
            .manifests
            .lock()
            .unwrap()
            .get(&release.name)
            .cloned()
            .unwrap_or_default())
    }
}
