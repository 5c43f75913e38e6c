//! Packaged CRD handling
//!
//! Helm only installs CRDs shipped in a chart's `crds/` directory when
//! they are missing. The release declaration can extend that: upgrade on
//! spec drift (`allow_upgrade`) or apply unconditionally up-front
//! (`force_upgrade`).

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use navecd_core::{CrdHandling, TypeMeta};

use crate::client::{apply_object, ClusterClient};
use crate::error::{KubeError, Result};

fn crd_type_meta() -> TypeMeta {
    TypeMeta {
        api_version: "apiextensions.k8s.io/v1".to_string(),
        kind: "CustomResourceDefinition".to_string(),
    }
}

fn crd_name(crd: &Value) -> Result<&str> {
    crd.pointer("/metadata/name")
        .and_then(Value::as_str)
        .ok_or_else(|| KubeError::InvalidObject {
            message: "CRD is missing metadata.name".to_string(),
        })
}

/// Reconciles the CRDs packaged within a chart according to the declared
/// handling flags.
pub async fn reconcile_packaged_crds(
    client: &dyn ClusterClient,
    crds: &[Value],
    handling: CrdHandling,
    field_manager: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    for crd in crds {
        let name = crd_name(crd)?;

        if handling.force_upgrade {
            info!(crd = name, "Applying packaged CRD (forced)");
            apply_crd(client, crd, field_manager, cancel).await?;
            continue;
        }

        let existing = client.get(&crd_type_meta(), name, "").await?;
        match existing {
            None => {
                info!(crd = name, "Installing missing packaged CRD");
                apply_crd(client, crd, field_manager, cancel).await?;
            }
            Some(cluster_crd) if handling.allow_upgrade => {
                if cluster_crd.get("spec") != crd.get("spec") {
                    info!(crd = name, "Packaged CRD drifted, upgrading");
                    apply_crd(client, crd, field_manager, cancel).await?;
                } else {
                    debug!(crd = name, "Packaged CRD is up to date");
                }
            }
            Some(_) => {
                // Helm default: existing CRDs are never touched.
                debug!(crd = name, "Skipping existing packaged CRD");
            }
        }
    }
    Ok(())
}

async fn apply_crd(
    client: &dyn ClusterClient,
    crd: &Value,
    field_manager: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let object = navecd_core::ExtendedObject::new(crd.clone());
    apply_object(client, &object, field_manager, cancel).await
}
