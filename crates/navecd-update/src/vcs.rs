//! VCS interface
//!
//! The raw git transport is an external collaborator; the updater only
//! needs a working tree, commits and pull requests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;

/// A checked-out source-of-truth repository.
#[async_trait]
pub trait VcsRepository: Send + Sync {
    /// Root of the working tree the updater edits files in.
    fn work_dir(&self) -> &Path;

    /// Commits all pending changes and pushes to `branch`. Returns the
    /// commit hash.
    async fn commit_and_push(&self, message: &str, branch: &str) -> Result<String>;

    /// Opens a pull request from `branch` onto the default branch.
    async fn open_pull_request(&self, title: &str, branch: &str) -> Result<()>;
}

/// A recorded commit of the mock repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommit {
    pub message: String,
    pub branch: String,
}

/// In-memory repository over a temp working tree, for tests.
pub struct MockVcsRepository {
    work_dir: PathBuf,
    commits: std::sync::Mutex<Vec<RecordedCommit>>,
    pull_requests: std::sync::Mutex<Vec<String>>,
}

impl MockVcsRepository {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            commits: std::sync::Mutex::new(Vec::new()),
            pull_requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn commits(&self) -> Vec<RecordedCommit> {
        self.commits.lock().unwrap().clone()
    }

    pub fn pull_requests(&self) -> Vec<String> {
        self.pull_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl VcsRepository for MockVcsRepository {
    fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    async fn commit_and_push(&self, message: &str, branch: &str) -> Result<String> {
        let mut commits = self.commits.lock().unwrap();
        commits.push(RecordedCommit {
            message: message.to_string(),
            branch: branch.to_string(),
        });
        Ok(format!("commit-{}", commits.len()))
    }

    async fn open_pull_request(&self, title: &str, _branch: &str) -> Result<()> {
        self.pull_requests.lock().unwrap().push(title.to_string());
        Ok(())
    }
}
