//! Update consumer
//!
//! A single task drains available updates and commits them back to the
//! source of truth. Serializing all edits through one consumer avoids
//! conflicting commits when multiple scan jobs fire at once.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::error::{Result, UpdateError};
use crate::instruction::UpdateIntegration;
use crate::scan::ImageScan;
use crate::vcs::VcsRepository;

/// A scan result ready to be written back.
#[derive(Debug, Clone)]
pub struct AvailableUpdate {
    pub image_scan: ImageScan,
    pub integration: UpdateIntegration,

    /// File holding the version token, relative to the repository root.
    pub file: String,

    /// 1-based line number of the version token.
    pub line: usize,

    /// Unique target name, used for commit messages and branch names.
    pub target_name: String,

    /// Branch updates are pushed to.
    pub branch: String,
}

/// Applies available updates to the repository, one at a time.
pub struct Updater {
    pub repository: Arc<dyn VcsRepository>,
}

impl Updater {
    /// Spawns the consumer task and returns the channel feeding it.
    pub fn listen(self) -> mpsc::Sender<AvailableUpdate> {
        let (tx, mut rx) = mpsc::channel::<AvailableUpdate>(64);

        tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                if let Err(err) = self.apply(&update).await {
                    error!(
                        target = %update.target_name,
                        error = %err,
                        "Unable to apply update"
                    );
                }
            }
        });

        tx
    }

    async fn apply(&self, update: &AvailableUpdate) -> Result<()> {
        info!(
            target = %update.target_name,
            from = %update.image_scan.current_version,
            to = %update.image_scan.new_version,
            "Applying update"
        );

        self.rewrite_version(update)?;

        let message = format!(
            "chore(update): bump {} to {}",
            update.target_name, update.image_scan.new_version
        );

        match update.integration {
            UpdateIntegration::DirectPush => {
                self.repository
                    .commit_and_push(&message, &update.branch)
                    .await?;
            }
            UpdateIntegration::PullRequest => {
                let update_branch = format!(
                    "navecd/update-{}",
                    update.target_name.replace(['/', ':'], "-")
                );
                self.repository
                    .commit_and_push(&message, &update_branch)
                    .await?;
                self.repository
                    .open_pull_request(&message, &update_branch)
                    .await?;
            }
        }

        Ok(())
    }

    /// Replaces the current version token in the recorded file line.
    fn rewrite_version(&self, update: &AvailableUpdate) -> Result<()> {
        let path = self.repository.work_dir().join(&update.file);
        let contents = std::fs::read_to_string(&path)?;

        let mut lines: Vec<String> = contents
            .split_inclusive('\n')
            .map(str::to_string)
            .collect();
        let index = update.line.saturating_sub(1);
        let line = lines
            .get(index)
            .ok_or_else(|| UpdateError::VersionTokenNotFound {
                file: update.file.clone(),
                line: update.line,
                token: update.image_scan.current_version.clone(),
            })?;

        let current = &update.image_scan.current_version;
        if !line.contains(current.as_str()) {
            return Err(UpdateError::VersionTokenNotFound {
                file: update.file.clone(),
                line: update.line,
                token: current.clone(),
            });
        }

        lines[index] = line.replacen(current.as_str(), &update.image_scan.new_version, 1);
        let rewritten: String = lines.concat();

        std::fs::write(&path, rewritten)?;
        Ok(())
    }
}
