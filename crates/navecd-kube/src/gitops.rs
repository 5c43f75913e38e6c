//! The GitOpsProject custom resource
//!
//! `gitops.navecd.io/v1beta1/GitOpsProject`, namespaced, short name `gop`.
//! One resource per managed project; the controller reconciles each on its
//! own pull interval. The CRD manifest itself is generated and installed
//! by the install tooling; the schema derive is disabled here.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use navecd_core::Auth;

use crate::error::{KubeError, Result};

/// Lowest accepted pull interval, enforced server-side as well.
pub const MIN_PULL_INTERVAL_SECONDS: i64 = 5;

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[kube(
    group = "gitops.navecd.io",
    version = "v1beta1",
    kind = "GitOpsProject",
    namespaced,
    shortname = "gop",
    status = "GitOpsProjectStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct GitOpsProjectSpec {
    /// The url to the project's OCI repository.
    pub url: String,

    /// The artifact reference (tag) holding the packaged project.
    #[serde(rename = "ref")]
    pub reference: String,

    /// The directory within the packaged project holding the
    /// configuration. "." for the root.
    pub dir: String,

    /// How often the controller fetches changes, in seconds. Must be at
    /// least 5.
    pub pull_interval_seconds: i64,

    /// Tells the controller to suspend subsequent executions. Does not
    /// apply to already started executions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend: Option<bool>,

    /// Service account the reconciliation impersonates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    /// Authentication for the project's OCI repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GitOpsProjectStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<GitOpsProjectRevision>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// The last reconciled artifact.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GitOpsProjectRevision {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconcile_time: Option<DateTime<Utc>>,
}

/// Standard Kubernetes condition shape.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl GitOpsProjectSpec {
    /// Client-side mirror of the CRD validation rules.
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(invalid("spec.url must not be empty"));
        }
        if self.reference.is_empty() {
            return Err(invalid("spec.ref must not be empty"));
        }
        if self.dir.is_empty() {
            return Err(invalid("spec.dir must not be empty"));
        }
        if self.pull_interval_seconds < MIN_PULL_INTERVAL_SECONDS {
            return Err(invalid(
                "spec.pullIntervalSeconds must be at least 5 seconds",
            ));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> KubeError {
    KubeError::InvalidObject {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> GitOpsProjectSpec {
        GitOpsProjectSpec {
            url: "oci://ghcr.io/org/project".to_string(),
            reference: "main".to_string(),
            dir: ".".to_string(),
            pull_interval_seconds: 30,
            suspend: None,
            service_account_name: None,
            auth: None,
        }
    }

    #[test]
    fn test_valid_spec() {
        assert!(spec().validate().is_ok());
    }

    #[test]
    fn test_pull_interval_lower_bound() {
        let mut project = spec();
        project.pull_interval_seconds = 4;
        assert!(project.validate().is_err());

        project.pull_interval_seconds = 5;
        assert!(project.validate().is_ok());
    }

    #[test]
    fn test_empty_fields_rejected() {
        for field in ["url", "ref", "dir"] {
            let mut project = spec();
            match field {
                "url" => project.url.clear(),
                "ref" => project.reference.clear(),
                _ => project.dir.clear(),
            }
            assert!(project.validate().is_err(), "{field} must be required");
        }
    }

    #[test]
    fn test_spec_wire_format() {
        let project = spec();
        let encoded = serde_json::to_value(&project).unwrap();
        assert_eq!(encoded["ref"], "main");
        assert_eq!(encoded["pullIntervalSeconds"], 30);
        assert!(encoded.get("suspend").is_none());
    }
}
