//! Garbage collector
//!
//! Inspects the inventory for manifests and Helm releases no longer
//! declared in the current dependency graph and removes them from the
//! cluster and the inventory. Collection runs before apply each tick so
//! renamed objects disappear before their successor id is applied.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use navecd_core::{inventory, DependencyGraph};
use navecd_helm::ChartReconciler;
use navecd_kube::ClusterClient;
use navecd_registry::RegistryClient;

use crate::error::{ProjectError, Result};
use crate::pool;

/// Uninstalls dangling inventory items.
pub struct GarbageCollector<C> {
    pub cluster: Arc<dyn ClusterClient>,
    pub chart_reconciler: Arc<ChartReconciler<C>>,
    pub inventory: inventory::Instance,

    /// Limit of concurrent collections; -1 is unbounded.
    pub worker_pool_size: i64,
}

impl<C: RegistryClient + 'static> GarbageCollector<C> {
    /// Removes every inventory item whose id is not referenced by the
    /// graph. Collections run concurrently; the first error is returned
    /// after in-flight collections finish.
    pub async fn collect(&self, dag: &DependencyGraph, cancel: &CancellationToken) -> Result<()> {
        let storage = self.inventory.load()?;

        let semaphore = pool::semaphore(self.worker_pool_size);
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();

        for (id, item) in storage.items() {
            if cancel.is_cancelled() {
                return Err(ProjectError::Canceled);
            }

            let referenced = dag.get(id).is_some_and(|component| component.id() == id);
            if referenced {
                continue;
            }

            let cluster = self.cluster.clone();
            let charts = self.chart_reconciler.clone();
            let inventory = self.inventory.clone();
            let semaphore = semaphore.clone();
            let item = item.clone();

            tasks.spawn(async move {
                let _permit = pool::acquire(&semaphore).await;
                collect_item(cluster, charts, inventory, item).await
            });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(error = %err, "Unable to collect inventory item");
                    first_error.get_or_insert(err);
                }
                Err(err) => {
                    first_error.get_or_insert(ProjectError::Task {
                        message: err.to_string(),
                    });
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

async fn collect_item<C: RegistryClient + 'static>(
    cluster: Arc<dyn ClusterClient>,
    charts: Arc<ChartReconciler<C>>,
    inventory: inventory::Instance,
    item: inventory::Item,
) -> Result<()> {
    match &item {
        inventory::Item::HelmRelease(release) => {
            info!(
                namespace = %release.namespace,
                name = %release.name,
                "Collecting unreferenced helm release"
            );
            charts.uninstall(&release.namespace, &release.name).await?;
        }
        inventory::Item::Manifest(manifest) => {
            info!(
                namespace = %manifest.namespace,
                name = %manifest.name,
                kind = %manifest.type_meta.kind,
                "Collecting unreferenced manifest"
            );
            cluster
                .delete(&manifest.type_meta, &manifest.name, &manifest.namespace)
                .await?;
        }
    }

    inventory.delete_item(&item)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use navecd_core::{Component, ExtendedObject, ManifestComponent, TypeMeta};
    use navecd_helm::{MockReleaseStorage, StaticRenderer};
    use navecd_kube::RecordingClusterClient;
    use navecd_registry::{ChartFetcher, MockRegistryClient};
    use serde_json::json;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn deployment_component(name: &str, namespace: &str) -> Component {
        Component::Manifest(ManifestComponent {
            id: format!("{name}_{namespace}_apps_Deployment"),
            dependencies: vec![],
            content: ExtendedObject::new(json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": {"name": name, "namespace": namespace},
            })),
        })
    }

    fn manifest_item(name: &str, namespace: &str) -> inventory::Item {
        inventory::Item::Manifest(inventory::ManifestItem {
            type_meta: TypeMeta {
                api_version: "apps/v1".to_string(),
                kind: "Deployment".to_string(),
            },
            name: name.to_string(),
            namespace: namespace.to_string(),
            id: format!("{name}_{namespace}_apps_Deployment"),
        })
    }

    struct Harness {
        collector: GarbageCollector<MockRegistryClient>,
        cluster: Arc<RecordingClusterClient>,
        _temp: TempDir,
    }

    fn harness() -> Harness {
        let temp = TempDir::new().unwrap();
        let cluster = Arc::new(RecordingClusterClient::new());
        let inventory = inventory::Instance::new(temp.path().join("inventory"));

        let chart_reconciler = Arc::new(ChartReconciler {
            cluster: cluster.clone(),
            fetcher: ChartFetcher::new(MockRegistryClient::new(), temp.path().join("charts")),
            renderer: Arc::new(StaticRenderer::new()),
            storage: Arc::new(MockReleaseStorage::new()),
            credentials: None,
            inventory: inventory.clone(),
            field_manager: "navecd".to_string(),
        });

        Harness {
            collector: GarbageCollector {
                cluster: cluster.clone(),
                chart_reconciler,
                inventory,
                worker_pool_size: 4,
            },
            cluster,
            _temp: temp,
        }
    }

    fn store(harness: &Harness, item: &inventory::Item, payload: &str) {
        let mut reader = Cursor::new(payload.as_bytes().to_vec());
        harness
            .collector
            .inventory
            .store_item(item, Some(&mut reader as &mut dyn std::io::Read))
            .unwrap();
    }

    #[tokio::test]
    async fn test_unreferenced_manifest_is_collected() {
        let harness = harness();
        harness.cluster.seed(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "orphan", "namespace": "prod"},
        }));
        store(
            &harness,
            &manifest_item("orphan", "prod"),
            r#"{"apiVersion":"apps/v1","kind":"Deployment"}"#,
        );

        let dag = DependencyGraph::new();
        harness
            .collector
            .collect(&dag, &CancellationToken::new())
            .await
            .unwrap();

        assert!(harness
            .cluster
            .stored("apps/v1", "Deployment", "prod", "orphan")
            .is_none());
        assert!(harness.collector.inventory.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_referenced_items_survive() {
        let harness = harness();
        store(
            &harness,
            &manifest_item("app", "prod"),
            r#"{"apiVersion":"apps/v1","kind":"Deployment"}"#,
        );

        let mut dag = DependencyGraph::new();
        dag.insert([deployment_component("app", "prod")]).unwrap();

        harness
            .collector
            .collect(&dag, &CancellationToken::new())
            .await
            .unwrap();

        let storage = harness.collector.inventory.load().unwrap();
        assert_eq!(storage.len(), 1);
        assert!(harness.cluster.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_rename_collects_old_id() {
        let harness = harness();
        store(
            &harness,
            &manifest_item("dep", "a"),
            r#"{"apiVersion":"apps/v1","kind":"Deployment"}"#,
        );

        // The graph now only declares the renamed deployment.
        let mut dag = DependencyGraph::new();
        dag.insert([deployment_component("dep2", "a")]).unwrap();

        harness
            .collector
            .collect(&dag, &CancellationToken::new())
            .await
            .unwrap();

        let storage = harness.collector.inventory.load().unwrap();
        assert!(!storage.items().contains_key("dep_a_apps_Deployment"));

        let ids: Vec<String> = harness.cluster.deleted();
        assert!(ids.iter().any(|key| key.contains("dep")));
    }

    #[tokio::test]
    async fn test_inventory_matches_graph_after_collection() {
        let harness = harness();
        for name in ["a", "b", "c"] {
            store(
                &harness,
                &manifest_item(name, "prod"),
                r#"{"apiVersion":"apps/v1","kind":"Deployment"}"#,
            );
        }

        let mut dag = DependencyGraph::new();
        dag.insert([
            deployment_component("a", "prod"),
            deployment_component("b", "prod"),
        ])
        .unwrap();

        harness
            .collector
            .collect(&dag, &CancellationToken::new())
            .await
            .unwrap();

        let storage = harness.collector.inventory.load().unwrap();
        let mut ids: Vec<&str> = storage.items().keys().map(String::as_str).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["a_prod_apps_Deployment", "b_prod_apps_Deployment"]);
    }

    #[tokio::test]
    async fn test_unreferenced_release_is_uninstalled() {
        let harness = harness();
        let release_item = inventory::Item::HelmRelease(inventory::HelmReleaseItem {
            name: "grafana".to_string(),
            namespace: "monitoring".to_string(),
            id: "grafana_monitoring_HelmRelease".to_string(),
        });
        store(&harness, &release_item, "{}");

        let dag = DependencyGraph::new();
        harness
            .collector
            .collect(&dag, &CancellationToken::new())
            .await
            .unwrap();

        assert!(harness.collector.inventory.load().unwrap().is_empty());
    }
}
