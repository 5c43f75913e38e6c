//! Controller loop
//!
//! Runs one tick per project on its pull interval and reports the outcome
//! into the GitOpsProject status. Ticks of one project never overlap; the
//! next tick starts only after the previous finished.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use kube::api::{Patch, PatchParams};
use kube::Api;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use navecd_kube::{
    Condition, GitOpsProject, GitOpsProjectRevision, GitOpsProjectStatus,
};

use crate::compiler::ComponentCompiler;
use crate::error::{ProjectError, Result};
use crate::project::{ProjectReconciler, ReconcileResult};

const READY_CONDITION: &str = "Ready";

/// One reconciliation pass, stubbed in tests.
#[async_trait]
pub trait ProjectTick: Send + Sync {
    async fn tick(
        &self,
        project: &GitOpsProject,
        cancel: &CancellationToken,
    ) -> Result<ReconcileResult>;
}

#[async_trait]
impl<P: ComponentCompiler + 'static> ProjectTick for ProjectReconciler<P> {
    async fn tick(
        &self,
        project: &GitOpsProject,
        cancel: &CancellationToken,
    ) -> Result<ReconcileResult> {
        self.reconcile(project, cancel).await
    }
}

/// Writes the status of a project after a tick.
#[async_trait]
pub trait StatusWriter: Send + Sync {
    async fn write(&self, project: &GitOpsProject, status: GitOpsProjectStatus) -> Result<()>;
}

/// Patches the status subresource on the cluster.
pub struct KubeStatusWriter {
    client: kube::Client,
    field_manager: String,
}

impl KubeStatusWriter {
    pub fn new(client: kube::Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }
}

#[async_trait]
impl StatusWriter for KubeStatusWriter {
    async fn write(&self, project: &GitOpsProject, status: GitOpsProjectStatus) -> Result<()> {
        let namespace = project.metadata.namespace.as_deref().unwrap_or("default");
        let name = project
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ProjectError::LoadProject {
                message: "project has no name".to_string(),
            })?;

        let api: Api<GitOpsProject> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({
            "apiVersion": "gitops.navecd.io/v1beta1",
            "kind": "GitOpsProject",
            "status": status,
        });

        let params = PatchParams::apply(&self.field_manager);
        api.patch_status(name, &params, &Patch::Merge(&patch))
            .await
            .map_err(navecd_kube::KubeError::from)?;
        Ok(())
    }
}

/// Builds the status a tick outcome maps to. The digest of the previous
/// revision is carried forward when the pull failed.
pub fn status_for(
    result: &ReconcileResult,
    previous: Option<&GitOpsProjectStatus>,
) -> GitOpsProjectStatus {
    let now = Utc::now();

    let digest = result.digest.clone().or_else(|| {
        previous
            .and_then(|status| status.revision.as_ref())
            .and_then(|revision| revision.digest.clone())
    });

    let (status, reason, message) = if result.suspended {
        ("False", "Suspended", "Reconciliation is suspended".to_string())
    } else if let Some(err) = &result.component_error {
        ("False", "ComponentFailure", err.to_string())
    } else if let Some(err) = &result.pull_error {
        ("False", "PullFailure", err.to_string())
    } else {
        ("True", "ReconcileSuccess", "Project is reconciled".to_string())
    };

    GitOpsProjectStatus {
        revision: Some(GitOpsProjectRevision {
            digest,
            reconcile_time: Some(now),
        }),
        conditions: vec![Condition {
            condition_type: READY_CONDITION.to_string(),
            status: status.to_string(),
            reason: Some(reason.to_string()),
            message: Some(message),
            last_transition_time: Some(now),
        }],
    }
}

/// Drives one project until cancellation.
pub struct ProjectController {
    pub reconciler: Arc<dyn ProjectTick>,
    pub status: Arc<dyn StatusWriter>,
}

impl ProjectController {
    /// Ticks the project on its pull interval. One tick at a time; the
    /// interval starts counting after the previous tick finished.
    pub async fn run(&self, project: GitOpsProject, cancel: CancellationToken) {
        let interval = Duration::from_secs(project.spec.pull_interval_seconds.max(0) as u64);
        let name = project.metadata.name.clone().unwrap_or_default();

        loop {
            if cancel.is_cancelled() {
                return;
            }

            match self.reconciler.tick(&project, &cancel).await {
                Ok(result) => {
                    let status = status_for(&result, project.status.as_ref());
                    if let Err(err) = self.status.write(&project, status).await {
                        error!(project = %name, error = %err, "Unable to update project status");
                    }
                }
                Err(err) => {
                    error!(project = %name, error = %err, "Reconciliation failed");
                    let failed = ReconcileResult {
                        suspended: false,
                        digest: None,
                        pull_error: None,
                        component_error: Some(err),
                    };
                    let status = status_for(&failed, project.status.as_ref());
                    if let Err(err) = self.status.write(&project, status).await {
                        error!(project = %name, error = %err, "Unable to update project status");
                    }
                }
            }

            info!(project = %name, "Tick finished");
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}
