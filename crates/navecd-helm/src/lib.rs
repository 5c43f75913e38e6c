//! Navecd Helm - release reconciliation for the GitOps controller
//!
//! Installs and upgrades Helm releases declared as components:
//! - `chart`: loaded chart representation (metadata + packaged CRDs)
//! - `renderer`: the external template engine interface
//! - `release`: stored revisions and drift detection
//! - `storage`: Secrets-backed release persistence
//! - `reconciler`: the chart reconciler driving it all

pub mod chart;
pub mod error;
pub mod reconciler;
pub mod release;
pub mod renderer;
pub mod storage;

pub use chart::{ChartMetadata, LoadedChart};
pub use error::{HelmError, Result};
pub use reconciler::ChartReconciler;
pub use release::{has_drift, ManifestIdentity, StoredRelease};
pub use renderer::{ChartRenderer, StaticRenderer};
pub use storage::{MockReleaseStorage, ReleaseStorage, SecretsStorage};
