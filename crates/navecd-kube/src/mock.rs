//! Recording cluster client for tests
//!
//! An in-memory [`ClusterClient`] that stores applied objects, records
//! every apply with timing, and can simulate conflicts, unknown resource
//! types and plain apply failures.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use navecd_core::{deep_merge, TypeMeta};

use crate::client::{ApplyOptions, ClusterClient};
use crate::error::{KubeError, Result};

/// One recorded apply call.
#[derive(Debug, Clone)]
pub struct ApplyEvent {
    pub key: String,
    pub field_manager: String,
    pub force: bool,
    pub started: Instant,
    pub finished: Instant,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<String, Value>,
    conflicts: HashMap<String, String>,
    unknown_types: HashMap<String, usize>,
    failing: HashSet<String>,
    applies: Vec<ApplyEvent>,
    deletes: Vec<String>,
}

/// In-memory cluster with scriptable failure modes.
#[derive(Default)]
pub struct RecordingClusterClient {
    state: Mutex<State>,
    apply_delay: Option<Duration>,
}

impl RecordingClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every apply take at least `delay`, so tests can observe
    /// overlapping executions.
    pub fn with_apply_delay(delay: Duration) -> Self {
        Self {
            state: Mutex::default(),
            apply_delay: Some(delay),
        }
    }

    pub fn object_key(api_version: &str, kind: &str, namespace: &str, name: &str) -> String {
        format!("{api_version}/{kind}/{namespace}/{name}")
    }

    fn key_of(object: &Value) -> String {
        Self::object_key(
            object.get("apiVersion").and_then(Value::as_str).unwrap_or(""),
            object.get("kind").and_then(Value::as_str).unwrap_or(""),
            object
                .pointer("/metadata/namespace")
                .and_then(Value::as_str)
                .unwrap_or(""),
            object
                .pointer("/metadata/name")
                .and_then(Value::as_str)
                .unwrap_or(""),
        )
    }

    fn type_key(api_version: &str, kind: &str) -> String {
        format!("{api_version}/{kind}")
    }

    /// Places an object into the cluster without recording an apply.
    pub fn seed(&self, object: Value) {
        let key = Self::key_of(&object);
        self.state.lock().unwrap().objects.insert(key, object);
    }

    /// Declares that another field manager owns the field at `pointer` of
    /// the given object: applies whose payload carries that field conflict.
    pub fn conflict_on(
        &self,
        api_version: &str,
        kind: &str,
        namespace: &str,
        name: &str,
        pointer: &str,
    ) {
        self.state.lock().unwrap().conflicts.insert(
            Self::object_key(api_version, kind, namespace, name),
            pointer.to_string(),
        );
    }

    /// Simulates a resource type unknown to discovery for the next
    /// `failures` apply attempts.
    pub fn unknown_type_for(&self, api_version: &str, kind: &str, failures: usize) {
        self.state
            .lock()
            .unwrap()
            .unknown_types
            .insert(Self::type_key(api_version, kind), failures);
    }

    /// Makes applies of the given object fail unconditionally.
    pub fn fail_applies_of(&self, api_version: &str, kind: &str, namespace: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .failing
            .insert(Self::object_key(api_version, kind, namespace, name));
    }

    pub fn stored(
        &self,
        api_version: &str,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Option<Value> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&Self::object_key(api_version, kind, namespace, name))
            .cloned()
    }

    pub fn object_count(&self) -> usize {
        self.state.lock().unwrap().objects.len()
    }

    pub fn apply_events(&self) -> Vec<ApplyEvent> {
        self.state.lock().unwrap().applies.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deletes.clone()
    }

    /// Whether two applies of the given keys overlapped in time.
    pub fn applies_overlapped(&self, first: &str, second: &str) -> bool {
        let applies = self.apply_events();
        let of = |key: &str| {
            applies
                .iter()
                .find(|event| event.key.contains(key))
                .cloned()
        };
        match (of(first), of(second)) {
            (Some(a), Some(b)) => a.started < b.finished && b.started < a.finished,
            _ => false,
        }
    }
}

#[async_trait]
impl ClusterClient for RecordingClusterClient {
    async fn apply(
        &self,
        object: &Value,
        field_manager: &str,
        options: ApplyOptions,
    ) -> Result<()> {
        let started = Instant::now();
        if let Some(delay) = self.apply_delay {
            tokio::time::sleep(delay).await;
        }

        let key = Self::key_of(object);
        let type_key = Self::type_key(
            object.get("apiVersion").and_then(Value::as_str).unwrap_or(""),
            object.get("kind").and_then(Value::as_str).unwrap_or(""),
        );

        let mut state = self.state.lock().unwrap();
        state.applies.push(ApplyEvent {
            key: key.clone(),
            field_manager: field_manager.to_string(),
            force: options.force,
            started,
            finished: Instant::now(),
        });

        if let Some(remaining) = state.unknown_types.get_mut(&type_key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(KubeError::UnknownResourceType {
                    api_version: type_key.split('/').next().unwrap_or("").to_string(),
                    kind: type_key.rsplit('/').next().unwrap_or("").to_string(),
                });
            }
        }

        if state.failing.contains(&key) {
            return Err(KubeError::InvalidObject {
                message: format!("scripted failure for {key}"),
            });
        }

        if let Some(pointer) = state.conflicts.get(&key).cloned() {
            if object.pointer(&pointer).is_some() {
                return Err(KubeError::Conflict {
                    message: format!("field {pointer} is owned by another manager"),
                });
            }
        }

        if options.dry_run {
            return Ok(());
        }

        match state.objects.get_mut(&key) {
            Some(existing) => deep_merge(existing, object),
            None => {
                state.objects.insert(key, object.clone());
            }
        }
        Ok(())
    }

    async fn get(
        &self,
        type_meta: &TypeMeta,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Value>> {
        let key = Self::object_key(&type_meta.api_version, &type_meta.kind, namespace, name);
        Ok(self.state.lock().unwrap().objects.get(&key).cloned())
    }

    async fn delete(&self, type_meta: &TypeMeta, name: &str, namespace: &str) -> Result<()> {
        let key = Self::object_key(&type_meta.api_version, &type_meta.kind, namespace, name);
        let mut state = self.state.lock().unwrap();
        state.objects.remove(&key);
        state.deletes.push(key);
        Ok(())
    }
}
