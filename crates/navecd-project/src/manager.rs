//! Project manager
//!
//! Walks an extracted project tree, identifies package directories and
//! feeds them through the configuration compiler into a fresh dependency
//! graph. Discovery and compilation are pipelined: producer tasks emit
//! package paths onto a bounded channel while a single consumer compiles
//! and inserts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::debug;

use navecd_core::DependencyGraph;
use navecd_update::UpdateInstruction;

use crate::compiler::ComponentCompiler;
use crate::error::{ProjectError, Result};
use crate::pool;

/// Directories that never contain packages.
const SKIPPED_DIRS: [&str; 2] = ["cue.mod", ".git"];

/// Capacity of the package pipeline between discovery and compilation.
const PACKAGE_CHANNEL_CAPACITY: usize = 250;

/// The loaded project: its dependency graph and the update instructions
/// extracted from the configuration.
#[derive(Debug, Default)]
pub struct ProjectInstance {
    pub dag: DependencyGraph,
    pub instructions: Vec<UpdateInstruction>,
}

/// Loads a project and resolves the component dependency graph.
pub struct ProjectManager<P> {
    compiler: Arc<P>,
    worker_pool_size: i64,
}

impl<P: ComponentCompiler + 'static> ProjectManager<P> {
    pub fn new(compiler: Arc<P>, worker_pool_size: i64) -> Self {
        Self {
            compiler,
            worker_pool_size,
        }
    }

    pub fn compiler(&self) -> &Arc<P> {
        &self.compiler
    }

    /// Loads the project rooted at `project_path/dir`.
    pub async fn load(&self, project_path: &Path, dir: &str) -> Result<ProjectInstance> {
        let config_path = if dir == "." {
            project_path.to_path_buf()
        } else {
            project_path.join(dir)
        };

        if !config_path.is_dir() {
            return Err(ProjectError::LoadProject {
                message: format!("{} does not exist", config_path.display()),
            });
        }

        let (package_tx, mut package_rx) = mpsc::channel::<PathBuf>(PACKAGE_CHANNEL_CAPACITY);

        // Single consumer: compiles packages as they are discovered and
        // inserts into the graph.
        let compiler = self.compiler.clone();
        let consumer_root = project_path.to_path_buf();
        let consumer = tokio::spawn(async move {
            let mut instance = ProjectInstance::default();
            while let Some(package_path) = package_rx.recv().await {
                let output = compiler.compile(&consumer_root, &package_path).await?;
                instance.dag.insert(output.components)?;
                instance.instructions.extend(output.instructions);
            }
            Ok::<ProjectInstance, ProjectError>(instance)
        });

        // Producer group: each directory is checked for configuration
        // files concurrently.
        let directories = collect_directories(&config_path)?;
        let semaphore = pool::semaphore(self.worker_pool_size);
        let mut producers: JoinSet<Result<()>> = JoinSet::new();

        for directory in directories {
            let compiler = self.compiler.clone();
            let semaphore = semaphore.clone();
            let package_tx = package_tx.clone();
            let project_root = project_path.to_path_buf();

            producers.spawn(async move {
                let _permit = pool::acquire(&semaphore).await;

                let mut has_config = false;
                for entry in std::fs::read_dir(&directory)? {
                    let entry = entry?;
                    if entry.file_type()?.is_file()
                        && compiler.is_config_file(&entry.file_name().to_string_lossy())
                    {
                        has_config = true;
                        break;
                    }
                }
                if !has_config {
                    return Ok(());
                }

                let relative = directory
                    .strip_prefix(&project_root)
                    .map(Path::to_path_buf)
                    .map_err(|_| ProjectError::LoadProject {
                        message: format!("{} escapes the project", directory.display()),
                    })?;

                debug!(package = %relative.display(), "Discovered package");
                package_tx
                    .send(relative)
                    .await
                    .map_err(|_| ProjectError::Task {
                        message: "package consumer is gone".to_string(),
                    })
            });
        }
        drop(package_tx);

        let mut first_error = None;
        while let Some(joined) = producers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    first_error.get_or_insert(err);
                }
                Err(err) => {
                    first_error.get_or_insert(ProjectError::Task {
                        message: err.to_string(),
                    });
                }
            }
        }
        if let Some(err) = first_error {
            consumer.abort();
            return Err(err);
        }

        consumer.await.map_err(|err| ProjectError::Task {
            message: err.to_string(),
        })?
    }
}

/// All package candidate directories under `config_path`, including the
/// root itself.
fn collect_directories(config_path: &Path) -> Result<Vec<PathBuf>> {
    let mut directories = vec![config_path.to_path_buf()];
    let mut pending = vec![config_path.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            if SKIPPED_DIRS.iter().any(|skipped| name == *skipped) {
                continue;
            }
            let path = entry.path();
            directories.push(path.clone());
            pending.push(path);
        }
    }

    Ok(directories)
}
