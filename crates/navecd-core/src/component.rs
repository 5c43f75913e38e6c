//! Component model
//!
//! A component is the unit of declared cluster state: either a Kubernetes
//! manifest or a Helm release. Components reference each other exclusively
//! through stable string identifiers, which are the sole currency between
//! the dependency graph, the inventory and the reconciler.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::metadata::{strip_on_conflict, FieldMetadata};

/// Kubernetes type identification (apiVersion + kind).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMeta {
    pub api_version: String,
    pub kind: String,
}

impl TypeMeta {
    /// The api group portion of the apiVersion; empty for the core group.
    pub fn group(&self) -> &str {
        match self.api_version.rsplit_once('/') {
            Some((group, _)) => group,
            None => "",
        }
    }
}

/// A free-form Kubernetes object with an optional parallel metadata tree.
///
/// The compiler emits object and metadata together, so the two trees are
/// synchronized by construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedObject {
    pub object: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<FieldMetadata>,
}

impl ExtendedObject {
    pub fn new(object: Value) -> Self {
        Self {
            object,
            metadata: None,
        }
    }

    pub fn with_metadata(object: Value, metadata: FieldMetadata) -> Self {
        Self {
            object,
            metadata: Some(metadata),
        }
    }

    pub fn api_version(&self) -> &str {
        self.object
            .get("apiVersion")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn kind(&self) -> &str {
        self.object
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn name(&self) -> &str {
        self.object
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn namespace(&self) -> &str {
        self.object
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn type_meta(&self) -> TypeMeta {
        TypeMeta {
            api_version: self.api_version().to_string(),
            kind: self.kind().to_string(),
        }
    }

    /// The apply payload for a conflict retry: the object with every field
    /// marked `OnConflict` removed.
    pub fn conflict_retry_object(&self) -> Value {
        match &self.metadata {
            Some(metadata) => strip_on_conflict(&self.object, metadata),
            None => self.object.clone(),
        }
    }

    /// Validates that the object carries the fields every applied manifest
    /// needs: apiVersion, kind and metadata.name.
    pub fn validate(&self) -> Result<()> {
        if self.api_version().is_empty() {
            return Err(CoreError::MissingField {
                field: "apiVersion".to_string(),
            });
        }
        if self.kind().is_empty() {
            return Err(CoreError::MissingField {
                field: "kind".to_string(),
            });
        }
        if self.name().is_empty() {
            return Err(CoreError::MissingField {
                field: "metadata.name".to_string(),
            });
        }
        Ok(())
    }
}

/// Authentication reference for a remote registry or chart repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Auth {
    /// A Kubernetes secret holding `username` and `password` keys.
    SecretRef { name: String },

    /// Credentials acquired from a cloud workload-identity provider.
    WorkloadIdentity { provider: CloudProvider },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    Aws,
    Azure,
    Gcp,
}

impl std::str::FromStr for CloudProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "aws" => Ok(Self::Aws),
            "azure" => Ok(Self::Azure),
            "gcp" => Ok(Self::Gcp),
            other => Err(format!("unknown workload identity provider: {other}")),
        }
    }
}

/// Helm chart coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chart {
    pub name: String,

    #[serde(rename = "repoURL")]
    pub repo_url: String,

    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
}

impl Chart {
    /// Whether the chart lives in an OCI registry rather than an HTTPS
    /// repository.
    pub fn is_oci(&self) -> bool {
        self.repo_url.starts_with("oci://")
    }
}

/// Helm CRD handling configuration.
///
/// Helm itself only installs missing CRDs. These flags extend that to
/// drift-based or unconditional upgrades of CRDs packaged within a chart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrdHandling {
    /// Upgrade packaged CRDs when their spec drifted from the cluster.
    /// Ignored when `force_upgrade` is set.
    #[serde(default)]
    pub allow_upgrade: bool,

    /// Apply packaged CRDs up-front before drift detection.
    #[serde(default)]
    pub force_upgrade: bool,
}

/// Post-render patches, keyed by the rendered object they overlay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Patches {
    entries: BTreeMap<String, ExtendedObject>,
}

impl Patches {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(api_version: &str, kind: &str, namespace: &str, name: &str) -> String {
        format!("{api_version}/{kind}/{namespace}/{name}")
    }

    pub fn put(&mut self, patch: ExtendedObject) {
        let key = Self::key(
            patch.api_version(),
            patch.kind(),
            patch.namespace(),
            patch.name(),
        );
        self.entries.insert(key, patch);
    }

    /// Looks up the patch overlaying the given rendered object identity.
    pub fn get(
        &self,
        api_version: &str,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Option<&ExtendedObject> {
        self.entries
            .get(&Self::key(api_version, kind, namespace, name))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExtendedObject> {
        self.entries.values()
    }
}

/// Declaration of the desired state of a Helm release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseDeclaration {
    pub name: String,
    pub namespace: String,
    pub chart: Chart,

    #[serde(default)]
    pub values: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "Patches::is_empty")]
    pub patches: Patches,

    #[serde(default)]
    pub crds: CrdHandling,
}

/// A manifest component: one Kubernetes object plus its declared
/// dependencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestComponent {
    pub id: String,

    #[serde(default)]
    pub dependencies: Vec<String>,

    pub content: ExtendedObject,
}

/// A Helm release component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseComponent {
    pub id: String,

    #[serde(default)]
    pub dependencies: Vec<String>,

    pub release: ReleaseDeclaration,
}

/// The unit of declared state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Component {
    Manifest(ManifestComponent),
    HelmRelease(ReleaseComponent),
}

impl Component {
    pub fn id(&self) -> &str {
        match self {
            Component::Manifest(manifest) => &manifest.id,
            Component::HelmRelease(release) => &release.id,
        }
    }

    pub fn dependencies(&self) -> &[String] {
        match self {
            Component::Manifest(manifest) => &manifest.dependencies,
            Component::HelmRelease(release) => &release.dependencies,
        }
    }
}

/// Builds the stable identifier of a manifest object:
/// `<name>_<namespace>_<apiGroup>_<kind>`, with an empty group for the core
/// API.
pub fn manifest_id(object: &ExtendedObject) -> String {
    format!(
        "{}_{}_{}_{}",
        object.name(),
        object.namespace(),
        object.type_meta().group(),
        object.kind()
    )
}

/// Builds the stable identifier of a Helm release:
/// `<name>_<namespace>_HelmRelease`.
pub fn release_id(name: &str, namespace: &str) -> String {
    format!("{name}_{namespace}_HelmRelease")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deployment(name: &str, namespace: &str) -> ExtendedObject {
        ExtendedObject::new(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": name, "namespace": namespace},
            "spec": {"replicas": 1},
        }))
    }

    #[test]
    fn test_manifest_id_with_group() {
        let id = manifest_id(&deployment("a", "b"));
        assert_eq!(id, "a_b_apps_Deployment");
    }

    #[test]
    fn test_manifest_id_core_group() {
        let ns = ExtendedObject::new(json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {"name": "prod"},
        }));
        assert_eq!(manifest_id(&ns), "prod___Namespace");
    }

    #[test]
    fn test_release_id() {
        assert_eq!(release_id("grafana", "monitoring"), "grafana_monitoring_HelmRelease");
    }

    #[test]
    fn test_type_meta_group() {
        let tm = TypeMeta {
            api_version: "networking.k8s.io/v1".to_string(),
            kind: "Ingress".to_string(),
        };
        assert_eq!(tm.group(), "networking.k8s.io");

        let core = TypeMeta {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
        };
        assert_eq!(core.group(), "");
    }

    #[test]
    fn test_validate_missing_name() {
        let object = ExtendedObject::new(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {},
        }));

        let err = object.validate().unwrap_err();
        assert!(matches!(err, CoreError::MissingField { field } if field == "metadata.name"));
    }

    #[test]
    fn test_validate_ok() {
        assert!(deployment("a", "b").validate().is_ok());
    }

    #[test]
    fn test_patches_lookup() {
        let mut patches = Patches::new();
        patches.put(deployment("app", "prod"));

        assert!(patches.get("apps/v1", "Deployment", "prod", "app").is_some());
        assert!(patches.get("apps/v1", "Deployment", "prod", "other").is_none());
    }

    #[test]
    fn test_chart_is_oci() {
        let chart = Chart {
            name: "test".to_string(),
            repo_url: "oci://ghcr.io/org/charts".to_string(),
            version: "1.0.0".to_string(),
            auth: None,
        };
        assert!(chart.is_oci());

        let https = Chart {
            repo_url: "https://charts.example.com".to_string(),
            ..chart
        };
        assert!(!https.is_oci());
    }

    #[test]
    fn test_release_declaration_roundtrip() {
        let release = ReleaseDeclaration {
            name: "prometheus".to_string(),
            namespace: "monitoring".to_string(),
            chart: Chart {
                name: "prometheus".to_string(),
                repo_url: "https://charts.example.com".to_string(),
                version: "25.0.1".to_string(),
                auth: Some(Auth::SecretRef {
                    name: "repo-auth".to_string(),
                }),
            },
            values: BTreeMap::from([("replicas".to_string(), json!(2))]),
            patches: Patches::new(),
            crds: CrdHandling {
                allow_upgrade: true,
                force_upgrade: false,
            },
        };

        let encoded = serde_json::to_string(&release).unwrap();
        let decoded: ReleaseDeclaration = serde_json::from_str(&encoded).unwrap();
        assert_eq!(release, decoded);
    }
}
