//! Chart reconciler
//!
//! Drives a Helm release toward its declared state: acquire the chart,
//! handle packaged CRDs, decide install vs upgrade by diffing a dry-run
//! render against the deployed revision, apply post-render patches, and
//! record the outcome in release storage and the inventory.

use std::io::Cursor;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use navecd_core::{
    deep_merge, inventory, ExtendedObject, Patches, ReleaseComponent, ReleaseDeclaration,
};
use navecd_kube::{apply_object, reconcile_packaged_crds, ClusterClient};
use navecd_registry::{ChartFetcher, CredentialSource, RegistryClient, RegistryCredentials};

use crate::chart::LoadedChart;
use crate::error::Result;
use crate::release::{has_drift, ManifestIdentity, StoredRelease};
use crate::renderer::ChartRenderer;
use crate::storage::ReleaseStorage;

/// Reconciles Helm releases. Stores releases in the inventory, but never
/// collects them.
pub struct ChartReconciler<C> {
    pub cluster: Arc<dyn ClusterClient>,
    pub fetcher: ChartFetcher<C>,
    pub renderer: Arc<dyn ChartRenderer>,
    pub storage: Arc<dyn ReleaseStorage>,
    pub credentials: Option<Arc<dyn CredentialSource>>,
    pub inventory: inventory::Instance,
    pub field_manager: String,
}

impl<C: RegistryClient> ChartReconciler<C> {
    pub async fn reconcile(
        &self,
        component: &ReleaseComponent,
        cancel: &CancellationToken,
    ) -> Result<StoredRelease> {
        let declaration = &component.release;
        let chart = &declaration.chart;

        info!(
            release = %declaration.name,
            namespace = %declaration.namespace,
            chart = %chart.name,
            version = %chart.version,
            "Reconciling helm release"
        );

        let credentials = self.resolve_credentials(declaration).await?;
        let chart_dir = self.fetcher.fetch(chart, credentials).await?;
        let loaded = LoadedChart::load(&chart_dir)?;

        if !loaded.crds.is_empty() {
            reconcile_packaged_crds(
                self.cluster.as_ref(),
                &loaded.crds,
                declaration.crds,
                &self.field_manager,
                cancel,
            )
            .await?;
        }

        let rendered = self.renderer.render(&chart_dir, declaration).await?;
        let objects = merge_patches(rendered, &declaration.patches, &declaration.namespace);
        let manifests: Vec<Value> = objects.iter().map(|object| object.object.clone()).collect();

        let existing = self
            .storage
            .get_latest(&declaration.namespace, &declaration.name)
            .await?;

        let release = match existing {
            None => {
                info!(release = %declaration.name, "Installing helm release");
                self.apply_all(&objects, cancel).await?;
                let release = StoredRelease::for_install(declaration.clone(), manifests);
                self.storage.create(&release).await?;
                release
            }
            Some(existing) => {
                if !has_drift(&manifests, &existing.manifests) {
                    debug!(release = %declaration.name, "No changes");
                    self.record_inventory(component)?;
                    return Ok(existing);
                }

                info!(
                    release = %declaration.name,
                    version = existing.version + 1,
                    "Upgrading helm release"
                );
                self.apply_all(&objects, cancel).await?;
                let release =
                    StoredRelease::for_upgrade(&existing, declaration.clone(), manifests);
                self.storage.create(&release).await?;
                release
            }
        };

        self.record_inventory(component)?;
        Ok(release)
    }

    /// Uninstalls a release and drops its stored revisions. The inventory
    /// record is removed by the caller.
    pub async fn uninstall(&self, namespace: &str, name: &str) -> Result<()> {
        info!(release = name, namespace, "Uninstalling helm release");

        if let Some(release) = self.storage.get_latest(namespace, name).await? {
            // Deletion walks the manifests in reverse application order.
            for manifest in release.manifests.iter().rev() {
                let Some(identity) = ManifestIdentity::of(manifest) else {
                    continue;
                };
                let type_meta = navecd_core::TypeMeta {
                    api_version: manifest
                        .get("apiVersion")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    kind: identity.kind.clone(),
                };
                self.cluster
                    .delete(&type_meta, &identity.name, &identity.namespace)
                    .await?;
            }
        }

        self.storage.delete_all(namespace, name).await?;
        Ok(())
    }

    async fn resolve_credentials(
        &self,
        declaration: &ReleaseDeclaration,
    ) -> Result<Option<RegistryCredentials>> {
        let Some(auth) = &declaration.chart.auth else {
            return Ok(None);
        };
        let Some(resolver) = &self.credentials else {
            return Ok(None);
        };

        let host = repository_host(&declaration.chart.repo_url);
        Ok(Some(resolver.resolve_auth(auth, &host).await?))
    }

    async fn apply_all(
        &self,
        objects: &[ExtendedObject],
        cancel: &CancellationToken,
    ) -> Result<()> {
        for object in objects {
            apply_object(
                self.cluster.as_ref(),
                object,
                &self.field_manager,
                cancel,
            )
            .await?;
        }
        Ok(())
    }

    fn record_inventory(&self, component: &ReleaseComponent) -> Result<()> {
        let declaration = &component.release;
        let item = inventory::Item::HelmRelease(inventory::HelmReleaseItem {
            name: declaration.name.clone(),
            namespace: declaration.namespace.clone(),
            id: component.id.clone(),
        });

        let payload = serde_json::to_vec(declaration)?;
        let mut reader = Cursor::new(payload);
        self.inventory
            .store_item(&item, Some(&mut reader as &mut dyn std::io::Read))?;
        Ok(())
    }
}

fn repository_host(repo_url: &str) -> String {
    repo_url
        .trim_start_matches("oci://")
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or("")
        .to_string()
}

/// Overlays declared patches onto the rendered manifests.
///
/// A patch merges into the rendered object sharing its
/// apiVersion/kind/namespace/name; its field metadata rides along so a
/// later apply conflict can strip patched fields.
fn merge_patches(
    rendered: Vec<Value>,
    patches: &Patches,
    default_namespace: &str,
) -> Vec<ExtendedObject> {
    rendered
        .into_iter()
        .map(|mut manifest| {
            let api_version = manifest
                .get("apiVersion")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let kind = manifest
                .get("kind")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let name = manifest
                .pointer("/metadata/name")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let namespace = manifest
                .pointer("/metadata/namespace")
                .and_then(Value::as_str)
                .unwrap_or(default_namespace)
                .to_string();

            match patches.get(&api_version, &kind, &namespace, &name) {
                Some(patch) => {
                    deep_merge(&mut manifest, &patch.object);
                    ExtendedObject {
                        object: manifest,
                        metadata: patch.metadata.clone(),
                    }
                }
                None => ExtendedObject::new(manifest),
            }
        })
        .collect()
}
