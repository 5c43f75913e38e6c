//! Navecd Kube - dynamic cluster access for the GitOps controller
//!
//! - `client`: discovery-backed server-side apply with conflict and
//!   not-found retry semantics
//! - `crd`: packaged-CRD drift handling for Helm releases
//! - `diff`: live-vs-declared difference rendering
//! - `gitops`: the GitOpsProject custom resource
//! - `secrets`: cluster-backed credential secrets
//! - `mock`: a recording in-memory cluster for tests

pub mod client;
pub mod crd;
pub mod diff;
pub mod error;
pub mod gitops;
pub mod mock;
pub mod secrets;

pub use client::{
    apply_object, impersonate_service_account, ApplyOptions, ClusterClient, DynamicApplier,
};
pub use crd::reconcile_packaged_crds;
pub use diff::{DiffLine, DiffType, Differ, Difference};
pub use error::{KubeError, Result};
pub use gitops::{
    Condition, GitOpsProject, GitOpsProjectRevision, GitOpsProjectSpec, GitOpsProjectStatus,
    MIN_PULL_INTERVAL_SECONDS,
};
pub use mock::{ApplyEvent, RecordingClusterClient};
pub use secrets::KubeSecretStore;
