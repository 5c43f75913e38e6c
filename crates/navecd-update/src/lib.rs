//! Navecd Update - automated version bumps for the GitOps controller
//!
//! Scans image registries and chart repositories on cron schedules and
//! commits accepted version bumps back to the source of truth:
//! - `instruction`: what to scan and where the version token lives
//! - `strategy`: deciding whether a remote version supersedes the current
//! - `scan`: registry and chart repository scanning
//! - `scheduler`: the process-wide cron scheduler
//! - `updater`: the single consumer committing accepted updates
//! - `vcs`: the repository interface the updater writes through

pub mod error;
pub mod instruction;
pub mod scan;
pub mod scheduler;
pub mod strategy;
pub mod updater;
pub mod vcs;

pub use error::{Result, UpdateError};
pub use instruction::{
    parse_image, split_image, UpdateInstruction, UpdateIntegration, UpdateStrategy, UpdateTarget,
};
pub use scan::{ImageScan, Scanner};
pub use scheduler::{ScheduleRequest, UpdateScheduler};
pub use strategy::{SemVerStrategy, VersionMatch, VersionStrategy};
pub use updater::{AvailableUpdate, Updater};
pub use vcs::{MockVcsRepository, RecordedCommit, VcsRepository};
