//! CUE compiler bridge
//!
//! The typed-configuration compiler is the external `cue` toolchain. A
//! package directory is exported to JSON and the resulting component
//! declarations are decoded into the controller's component model.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use navecd_core::Component;
use navecd_project::{CompileOutput, ComponentCompiler, ProjectError};
use navecd_update::UpdateInstruction;

/// The shape of one exported package: component declarations keyed by
/// field name, plus the update instructions the tooling extracted.
#[derive(serde::Deserialize)]
struct ExportedPackage {
    #[serde(default)]
    components: BTreeMap<String, Component>,

    #[serde(default)]
    updates: Vec<UpdateInstruction>,
}

/// Compiles packages by shelling out to `cue export`.
pub struct CueCompiler {
    binary: String,
}

impl CueCompiler {
    pub fn new() -> Self {
        Self {
            binary: std::env::var("NAVECD_CUE_BINARY").unwrap_or_else(|_| "cue".to_string()),
        }
    }
}

impl Default for CueCompiler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ComponentCompiler for CueCompiler {
    fn is_config_file(&self, file_name: &str) -> bool {
        file_name.ends_with(".cue")
    }

    async fn compile(
        &self,
        project_root: &Path,
        package_path: &Path,
    ) -> Result<CompileOutput, ProjectError> {
        let package = package_path.to_string_lossy().replace('\\', "/");

        let output = Command::new(&self.binary)
            .arg("export")
            .arg(format!("./{package}"))
            .arg("--out")
            .arg("json")
            .current_dir(project_root)
            .output()
            .await
            .map_err(|err| ProjectError::Compile {
                package: package.clone(),
                message: format!("unable to run {}: {err}", self.binary),
            })?;

        if !output.status.success() {
            return Err(ProjectError::Compile {
                package,
                message: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let exported: ExportedPackage =
            serde_json::from_slice(&output.stdout).map_err(|err| ProjectError::Compile {
                package,
                message: format!("invalid export: {err}"),
            })?;

        Ok(CompileOutput {
            components: exported.components.into_values().collect(),
            instructions: exported.updates,
        })
    }
}
