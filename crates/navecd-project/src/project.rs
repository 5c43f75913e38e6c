//! Project reconciler
//!
//! One tick per GitOpsProject: load the artifact, compile the project,
//! hand update instructions to the scheduler, collect garbage and apply
//! the dependency graph. Pull and component failures are soft so a stale
//! state keeps reconciling on subsequent ticks; graph construction,
//! unrecoverable loads and impersonation failures are hard.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use navecd_core::inventory;
use navecd_helm::{ChartRenderer, ChartReconciler, ReleaseStorage};
use navecd_kube::{
    impersonate_service_account, ClusterClient, DynamicApplier, GitOpsProject, GitOpsProjectSpec,
};
use navecd_registry::{
    CredentialSource, DistributionClient, ProjectClient, RegistryClient, RegistryError,
};
use navecd_update::{ScheduleRequest, UpdateScheduler};

use crate::compiler::ComponentCompiler;
use crate::error::{ProjectError, Result};
use crate::garbage::GarbageCollector;
use crate::manager::ProjectManager;
use crate::reconciler::ComponentReconciler;

/// The outcome and metadata of one reconciliation tick.
#[derive(Debug, Default)]
pub struct ReconcileResult {
    /// Whether the GitOpsProject was flagged as suspended.
    pub suspended: bool,

    /// The digest of the reconciled artifact; `None` when the pull
    /// failed and the previous state was reconciled.
    pub digest: Option<String>,

    /// Soft failure while pulling the artifact.
    pub pull_error: Option<ProjectError>,

    /// First component failure of the apply phase.
    pub component_error: Option<ProjectError>,
}

/// Builds cluster clients, optionally impersonating a service account.
#[async_trait]
pub trait ClusterClientProvider: Send + Sync {
    async fn cluster_client(
        &self,
        service_account: Option<(&str, &str)>,
    ) -> Result<Arc<dyn ClusterClient>>;
}

/// Provider over a live cluster config.
pub struct KubeClientProvider {
    base_config: kube::Config,
}

impl KubeClientProvider {
    pub fn new(base_config: kube::Config) -> Self {
        Self { base_config }
    }
}

#[async_trait]
impl ClusterClientProvider for KubeClientProvider {
    async fn cluster_client(
        &self,
        service_account: Option<(&str, &str)>,
    ) -> Result<Arc<dyn ClusterClient>> {
        let config = match service_account {
            Some((namespace, name)) => {
                impersonate_service_account(self.base_config.clone(), namespace, name)
            }
            None => self.base_config.clone(),
        };

        let client = kube::Client::try_from(config).map_err(navecd_kube::KubeError::from)?;
        Ok(Arc::new(DynamicApplier::new(client).await?))
    }
}

/// Loads the project artifact of a GitOpsProject into a work directory.
#[async_trait]
pub trait ProjectLoader: Send + Sync {
    /// Returns the loaded artifact digest. Failures that permit falling
    /// back to the previous state are [`RegistryError::Recoverable`].
    async fn load(
        &self,
        spec: &GitOpsProjectSpec,
        target_dir: &Path,
    ) -> std::result::Result<String, RegistryError>;
}

/// OCI-backed loader.
pub struct OciProjectLoader {
    pub cache_dir: PathBuf,
    pub credentials: Option<Arc<dyn CredentialSource>>,
    pub insecure: bool,
}

#[async_trait]
impl ProjectLoader for OciProjectLoader {
    async fn load(
        &self,
        spec: &GitOpsProjectSpec,
        target_dir: &Path,
    ) -> std::result::Result<String, RegistryError> {
        let auth = match (&spec.auth, &self.credentials) {
            (Some(auth), Some(resolver)) => {
                let host = spec
                    .url
                    .trim_start_matches("oci://")
                    .split('/')
                    .next()
                    .unwrap_or("");
                Some(resolver.resolve_auth(auth, host).await?)
            }
            _ => None,
        };

        let client = ProjectClient::new(
            DistributionClient::new(self.insecure),
            spec.url.clone(),
            self.cache_dir.clone(),
        )
        .with_auth(auth.into());

        match client.load_image(&spec.reference, target_dir).await {
            Ok(digest) => Ok(digest),
            // Media type and unpack failures abort the tick; everything
            // else falls back to the previous state in the target dir.
            Err(err @ RegistryError::WrongMediaType { .. }) => Err(err),
            Err(err @ RegistryError::Unrecoverable { .. }) => Err(err),
            Err(err @ RegistryError::Recoverable { .. }) => Err(err),
            Err(err) => Err(err.recoverable(target_dir.to_path_buf())),
        }
    }
}

/// Per-project tick orchestration.
pub struct ProjectReconciler<P> {
    pub provider: Arc<dyn ClusterClientProvider>,
    pub loader: Arc<dyn ProjectLoader>,
    pub manager: ProjectManager<P>,
    pub registry: Arc<dyn RegistryClient>,
    pub renderer: Arc<dyn ChartRenderer>,
    pub release_storage: Arc<dyn ReleaseStorage>,
    pub credentials: Option<Arc<dyn CredentialSource>>,
    pub scheduler: Option<Arc<UpdateScheduler>>,

    /// Root for project work trees: `<cache_dir>/navecd/<uid>`.
    pub cache_dir: PathBuf,

    /// Root for per-project inventories: `<inventory_dir>/<uid>`.
    pub inventory_dir: PathBuf,

    pub field_manager: String,
    pub worker_pool_size: i64,
}

impl<P: ComponentCompiler + 'static> ProjectReconciler<P> {
    /// Runs one tick for the given project.
    pub async fn reconcile(
        &self,
        project: &GitOpsProject,
        cancel: &CancellationToken,
    ) -> Result<ReconcileResult> {
        if project.spec.suspend.unwrap_or(false) {
            return Ok(ReconcileResult {
                suspended: true,
                ..Default::default()
            });
        }

        project.spec.validate()?;

        let namespace = project
            .metadata
            .namespace
            .as_deref()
            .unwrap_or("default")
            .to_string();
        let name = project.metadata.name.as_deref().unwrap_or("").to_string();
        let uid = project
            .metadata
            .uid
            .clone()
            .unwrap_or_else(|| format!("{namespace}-{name}"));

        let service_account = project
            .spec
            .service_account_name
            .as_deref()
            .map(|account| (namespace.as_str(), account));
        let cluster = self.provider.cluster_client(service_account).await?;

        let repo_dir = self.cache_dir.join("navecd").join(&uid);
        let inventory = inventory::Instance::new(self.inventory_dir.join(&uid));

        let mut result = ReconcileResult::default();
        let mut project_path = repo_dir.clone();

        match self.loader.load(&project.spec, &repo_dir).await {
            Ok(digest) => {
                result.digest = Some(digest);
            }
            Err(err) if err.is_recoverable() => {
                warn!(
                    project = %name,
                    error = %err,
                    "Unable to pull project artifact, reconciling previous state"
                );
                if let Some(backup) = err.backup_path() {
                    project_path = backup.clone();
                }
                result.pull_error = Some(err.into());
            }
            Err(err) => {
                error!(project = %name, error = %err, "Unable to load project artifact");
                return Err(err.into());
            }
        }

        let instance = self.manager.load(&project_path, &project.spec.dir).await?;

        if let Some(scheduler) = &self.scheduler {
            let scheduler = scheduler.clone();
            let request = ScheduleRequest {
                project_uid: uid.clone(),
                branch: project.spec.reference.clone(),
                instructions: instance.instructions.clone(),
            };
            let project_name = name.clone();
            // Detached: scheduling failures never fail the tick.
            tokio::spawn(async move {
                let jobs = scheduler.schedule(request).await;
                info!(project = %project_name, jobs, "Reconciled update jobs");
            });
        }

        let chart_reconciler = Arc::new(ChartReconciler {
            cluster: cluster.clone(),
            fetcher: navecd_registry::ChartFetcher::new(
                self.registry.clone(),
                self.cache_dir.join("charts"),
            ),
            renderer: self.renderer.clone(),
            storage: self.release_storage.clone(),
            credentials: self.credentials.clone(),
            inventory: inventory.clone(),
            field_manager: self.field_manager.clone(),
        });

        let collector = GarbageCollector {
            cluster: cluster.clone(),
            chart_reconciler: chart_reconciler.clone(),
            inventory: inventory.clone(),
            worker_pool_size: self.worker_pool_size,
        };
        collector.collect(&instance.dag, cancel).await?;

        let sorted = instance.dag.topological_sort()?;

        let component_reconciler = ComponentReconciler {
            cluster,
            chart_reconciler,
            inventory,
            field_manager: self.field_manager.clone(),
            worker_pool_size: self.worker_pool_size,
        };

        if let Err(err) = component_reconciler.reconcile(sorted, cancel).await {
            error!(project = %name, error = %err, "Unable to reconcile components");
            result.component_error = Some(err);
        }

        info!(
            project = %name,
            digest = result.digest.as_deref().unwrap_or(""),
            "Reconciled project"
        );
        Ok(result)
    }
}
