//! `navecd verify` - compile a local project and check its graph

use std::path::Path;
use std::sync::Arc;

use navecd_project::ProjectManager;

use super::CommandResult;
use crate::compiler::CueCompiler;

pub async fn run(path: &Path, dir: &str) -> CommandResult {
    let manager = ProjectManager::new(Arc::new(CueCompiler::new()), -1);

    let instance = manager.load(path, dir).await?;
    let sorted = instance.dag.topological_sort()?;

    println!(
        "Project verified: {} components, {} update instructions",
        sorted.len(),
        instance.instructions.len()
    );
    Ok(())
}
