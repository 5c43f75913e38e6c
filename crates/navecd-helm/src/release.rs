//! Stored release state
//!
//! Every successful install or upgrade persists a versioned record of the
//! declaration and the manifests that were applied. The record is what a
//! later tick diffs its dry-run render against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use navecd_core::ReleaseDeclaration;

/// A deployed release revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRelease {
    pub name: String,
    pub namespace: String,

    /// Revision counter, starting at 1 for the install.
    pub version: u32,

    /// The declaration this revision was rendered from.
    pub declaration: ReleaseDeclaration,

    /// The manifests that were applied, post patches.
    pub manifests: Vec<Value>,

    pub deployed_at: DateTime<Utc>,
}

impl StoredRelease {
    /// The first revision of a release.
    pub fn for_install(declaration: ReleaseDeclaration, manifests: Vec<Value>) -> Self {
        Self {
            name: declaration.name.clone(),
            namespace: declaration.namespace.clone(),
            version: 1,
            declaration,
            manifests,
            deployed_at: Utc::now(),
        }
    }

    /// The next revision after an upgrade.
    pub fn for_upgrade(
        previous: &StoredRelease,
        declaration: ReleaseDeclaration,
        manifests: Vec<Value>,
    ) -> Self {
        Self {
            name: previous.name.clone(),
            namespace: previous.namespace.clone(),
            version: previous.version + 1,
            declaration,
            manifests,
            deployed_at: Utc::now(),
        }
    }
}

/// Identity of a rendered manifest: group, version, kind, namespace, name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManifestIdentity {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ManifestIdentity {
    pub fn of(manifest: &Value) -> Option<Self> {
        let api_version = manifest.get("apiVersion").and_then(Value::as_str)?;
        let (group, version) = match api_version.rsplit_once('/') {
            Some((group, version)) => (group, version),
            None => ("", api_version),
        };

        Some(Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: manifest.get("kind").and_then(Value::as_str)?.to_string(),
            namespace: manifest
                .pointer("/metadata/namespace")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            name: manifest
                .pointer("/metadata/name")
                .and_then(Value::as_str)?
                .to_string(),
        })
    }
}

/// Whether the freshly rendered manifests drift from the previously
/// deployed ones.
///
/// A rendered manifest drifts when no deployed manifest shares its
/// identity or when their `spec` fields differ. Objects without a `spec`
/// never report spec drift.
pub fn has_drift(rendered: &[Value], deployed: &[Value]) -> bool {
    for manifest in rendered {
        let Some(identity) = ManifestIdentity::of(manifest) else {
            return true;
        };

        let previous = deployed
            .iter()
            .find(|candidate| ManifestIdentity::of(candidate).as_ref() == Some(&identity));

        match previous {
            None => return true,
            Some(previous) => {
                if previous.get("spec") != manifest.get("spec") {
                    return true;
                }
            }
        }
    }
    false
}
