//! Configuration compiler interface
//!
//! The typed-configuration compiler is an external collaborator: given a
//! package directory it produces the component declarations and the update
//! instructions found in the configuration. Tests use [`StaticCompiler`].

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

use navecd_core::Component;
use navecd_update::UpdateInstruction;

use crate::error::{ProjectError, Result};

/// The output of compiling one package directory.
#[derive(Debug, Clone, Default)]
pub struct CompileOutput {
    pub components: Vec<Component>,
    pub instructions: Vec<UpdateInstruction>,
}

/// Compiles typed configuration packages into components.
#[async_trait]
pub trait ComponentCompiler: Send + Sync {
    /// Whether a file belongs to the compiler's configuration language.
    fn is_config_file(&self, file_name: &str) -> bool;

    /// Compiles the package at `package_path` (relative to
    /// `project_root`).
    async fn compile(&self, project_root: &Path, package_path: &Path) -> Result<CompileOutput>;
}

/// A compiler returning fixed outputs per package path, for tests.
#[derive(Default)]
pub struct StaticCompiler {
    packages: std::sync::Mutex<HashMap<String, CompileOutput>>,
}

impl StaticCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the output for a package-relative path.
    pub fn put(&self, package_path: &str, output: CompileOutput) {
        self.packages
            .lock()
            .unwrap()
            .insert(package_path.to_string(), output);
    }
}

#[async_trait]
impl ComponentCompiler for StaticCompiler {
    fn is_config_file(&self, file_name: &str) -> bool {
        file_name.ends_with(".cue")
    }

    async fn compile(&self, _project_root: &Path, package_path: &Path) -> Result<CompileOutput> {
        let key = package_path.to_string_lossy().replace('\\', "/");
        self.packages
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or_else(|| ProjectError::Compile {
                package: key,
                message: "no output registered".to_string(),
            })
    }
}
