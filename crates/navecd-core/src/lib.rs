//! Navecd Core - component model and controller state for the GitOps engine
//!
//! This crate provides the foundational types used throughout Navecd:
//! - `Component`: the unit of declared state (Manifest or HelmRelease)
//! - `FieldMetadata`: per-field apply hints mirroring a manifest's shape
//! - `DependencyGraph`: DAG with deterministic topological sort and layering
//! - `Instance`/`Storage`: the filesystem-backed inventory
//! - archive helpers for the artifact content layer

pub mod archive;
pub mod component;
pub mod error;
pub mod graph;
pub mod inventory;
pub mod metadata;
pub mod values;

pub use component::{
    manifest_id, release_id, Auth, Chart, CloudProvider, Component, CrdHandling, ExtendedObject,
    ManifestComponent, Patches, ReleaseComponent, ReleaseDeclaration, TypeMeta,
};
pub use error::{CoreError, Result};
pub use graph::{layer, DependencyGraph, Layer};
pub use inventory::{HelmReleaseItem, Instance, Item, ManifestItem, Storage};
pub use metadata::{strip_on_conflict, FieldHint, FieldMetadata, IgnoreInstruction};
pub use values::deep_merge;
