//! Component reconciler
//!
//! Consumes a topologically sorted component stream, partitions it into
//! layers and applies layers serially with components inside a layer
//! running concurrently up to the worker pool size. Failures propagate
//! forward: a component whose dependency failed in the previous layer is
//! skipped without counting as an error itself.

use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use navecd_core::{graph, inventory, Component};
use navecd_helm::ChartReconciler;
use navecd_kube::{apply_object, ClusterClient, Differ};
use navecd_registry::RegistryClient;

use crate::error::{ProjectError, Result};
use crate::pool;

/// Reads components with their desired state and applies them on the
/// cluster, storing applied objects in the inventory.
pub struct ComponentReconciler<C> {
    pub cluster: Arc<dyn ClusterClient>,
    pub chart_reconciler: Arc<ChartReconciler<C>>,
    pub inventory: inventory::Instance,
    pub field_manager: String,

    /// Limit of concurrent reconciliations per layer; -1 is unbounded.
    pub worker_pool_size: i64,
}

impl<C: RegistryClient + 'static> ComponentReconciler<C> {
    /// Reconciles all components and returns the first error encountered
    /// across all layers. Every non-skipped component is attempted; a
    /// layer never aborts on first failure.
    pub async fn reconcile(
        &self,
        components: Vec<Component>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let layers = graph::layer(components);

        let mut first_error: Option<ProjectError> = None;
        let mut previous_errors: HashSet<String> = HashSet::new();

        for current in layers {
            if cancel.is_cancelled() {
                return Err(ProjectError::Canceled);
            }

            let semaphore = pool::semaphore(self.worker_pool_size);
            let mut tasks: JoinSet<(String, Result<()>)> = JoinSet::new();

            for component in current.components {
                if component
                    .dependencies()
                    .iter()
                    .any(|dependency| previous_errors.contains(dependency))
                {
                    info!(id = component.id(), "Erroneous dependency. Skipping component");
                    continue;
                }

                let cluster = self.cluster.clone();
                let charts = self.chart_reconciler.clone();
                let inventory = self.inventory.clone();
                let field_manager = self.field_manager.clone();
                let semaphore = semaphore.clone();
                let cancel = cancel.clone();

                tasks.spawn(async move {
                    let _permit = pool::acquire(&semaphore).await;
                    let id = component.id().to_string();
                    let result = reconcile_component(
                        cluster,
                        charts,
                        inventory,
                        field_manager,
                        component,
                        cancel,
                    )
                    .await;
                    (id, result)
                });
            }

            let mut layer_errors = HashSet::new();
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((_, Ok(()))) => {}
                    Ok((id, Err(err))) => {
                        error!(id = %id, error = %err, "Unable to reconcile component");
                        layer_errors.insert(id);
                        first_error.get_or_insert(err);
                    }
                    Err(err) => {
                        first_error.get_or_insert(ProjectError::Task {
                            message: err.to_string(),
                        });
                    }
                }
            }

            previous_errors = layer_errors;
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

async fn reconcile_component<C: RegistryClient + 'static>(
    cluster: Arc<dyn ClusterClient>,
    charts: Arc<ChartReconciler<C>>,
    inventory: inventory::Instance,
    field_manager: String,
    component: Component,
    cancel: CancellationToken,
) -> Result<()> {
    match component {
        Component::Manifest(manifest) => {
            info!(
                namespace = manifest.content.namespace(),
                name = manifest.content.name(),
                kind = manifest.content.kind(),
                "Applying manifest"
            );

            // Rendering the difference costs extra round trips, so it only
            // happens when debug logging is on.
            if tracing::enabled!(tracing::Level::DEBUG) {
                let differ = Differ {
                    client: cluster.as_ref(),
                    field_manager: &field_manager,
                };
                match differ.diff(&manifest.content, &cancel).await {
                    Ok(difference) if difference.has_changes() => {
                        debug!(id = %manifest.id, diff = %difference, "Detected drift");
                    }
                    Ok(_) => {}
                    Err(err) => {
                        debug!(id = %manifest.id, error = %err, "Unable to render difference");
                    }
                }
            }

            apply_object(cluster.as_ref(), &manifest.content, &field_manager, &cancel).await?;

            let item = inventory::Item::Manifest(inventory::ManifestItem {
                type_meta: manifest.content.type_meta(),
                name: manifest.content.name().to_string(),
                namespace: manifest.content.namespace().to_string(),
                id: manifest.id.clone(),
            });
            let payload = serde_json::to_vec(&manifest.content.object)?;
            let mut reader = Cursor::new(payload);
            inventory.store_item(&item, Some(&mut reader as &mut dyn std::io::Read))?;
        }
        Component::HelmRelease(release) => {
            charts.reconcile(&release, &cancel).await?;
        }
    }
    Ok(())
}
