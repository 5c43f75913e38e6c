//! Per-field manifest metadata
//!
//! The configuration compiler emits a metadata tree alongside every manifest
//! object. The tree mirrors the object's shape and carries per-field hints,
//! currently only ignore instructions consumed during server-side apply
//! conflict retries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Instruction telling the reconciler to omit fields or subtrees on certain
/// events when applying manifests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IgnoreInstruction {
    /// The field is always enforced.
    #[default]
    None,

    /// The field is omitted from the payload on a retry after a
    /// server-side-apply conflict.
    OnConflict,
}

/// Hint attached to a single field or subtree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldHint {
    #[serde(default)]
    pub ignore: IgnoreInstruction,
}

/// Metadata tree mirroring a manifest object.
///
/// Every node can carry a hint for the value it mirrors plus child metadata
/// for struct fields (`node`) or list elements (`list`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<FieldHint>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node: BTreeMap<String, FieldMetadata>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub list: Vec<FieldMetadata>,
}

impl FieldMetadata {
    /// Metadata carrying a single hint for the mirrored value.
    pub fn hint(ignore: IgnoreInstruction) -> Self {
        Self {
            field: Some(FieldHint { ignore }),
            ..Default::default()
        }
    }

    /// Metadata for a struct value with per-field children.
    pub fn node(children: BTreeMap<String, FieldMetadata>) -> Self {
        Self {
            node: children,
            ..Default::default()
        }
    }

    fn ignored_on_conflict(&self) -> bool {
        matches!(
            self.field,
            Some(FieldHint {
                ignore: IgnoreInstruction::OnConflict,
            })
        )
    }
}

/// Returns a copy of `object` with every field or subtree marked
/// [`IgnoreInstruction::OnConflict`] removed.
///
/// Used to build the retry payload after a server-side-apply conflict: the
/// conflicting manager keeps ownership of the stripped fields.
pub fn strip_on_conflict(object: &Value, metadata: &FieldMetadata) -> Value {
    match object {
        Value::Object(fields) => {
            let mut stripped = serde_json::Map::with_capacity(fields.len());
            for (key, value) in fields {
                match metadata.node.get(key) {
                    Some(child) if child.ignored_on_conflict() => continue,
                    Some(child) => {
                        stripped.insert(key.clone(), strip_on_conflict(value, child));
                    }
                    None => {
                        stripped.insert(key.clone(), value.clone());
                    }
                }
            }
            Value::Object(stripped)
        }
        Value::Array(items) => {
            // List metadata is positional. Missing entries keep their value.
            let stripped = items
                .iter()
                .enumerate()
                .filter_map(|(idx, item)| match metadata.list.get(idx) {
                    Some(child) if child.ignored_on_conflict() => None,
                    Some(child) => Some(strip_on_conflict(item, child)),
                    None => Some(item.clone()),
                })
                .collect();
            Value::Array(stripped)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn replicas_on_conflict() -> FieldMetadata {
        let mut spec_children = BTreeMap::new();
        spec_children.insert(
            "replicas".to_string(),
            FieldMetadata::hint(IgnoreInstruction::OnConflict),
        );

        let mut root = BTreeMap::new();
        root.insert("spec".to_string(), FieldMetadata::node(spec_children));
        FieldMetadata::node(root)
    }

    #[test]
    fn test_strip_marked_field() {
        let object = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "spec": {
                "replicas": 1,
                "paused": false,
            },
        });

        let stripped = strip_on_conflict(&object, &replicas_on_conflict());

        assert_eq!(stripped["apiVersion"], "apps/v1");
        assert!(stripped["spec"].get("replicas").is_none());
        assert_eq!(stripped["spec"]["paused"], false);
    }

    #[test]
    fn test_strip_marked_subtree() {
        let mut root = BTreeMap::new();
        root.insert(
            "spec".to_string(),
            FieldMetadata::hint(IgnoreInstruction::OnConflict),
        );
        let metadata = FieldMetadata::node(root);

        let object = json!({"kind": "ConfigMap", "spec": {"a": 1}});
        let stripped = strip_on_conflict(&object, &metadata);

        assert!(stripped.get("spec").is_none());
        assert_eq!(stripped["kind"], "ConfigMap");
    }

    #[test]
    fn test_unmarked_fields_survive() {
        let object = json!({"spec": {"replicas": 3}, "status": {"ready": 2}});
        let stripped = strip_on_conflict(&object, &FieldMetadata::default());
        assert_eq!(stripped, object);
    }

    #[test]
    fn test_strip_list_element() {
        let metadata = FieldMetadata {
            list: vec![
                FieldMetadata::default(),
                FieldMetadata::hint(IgnoreInstruction::OnConflict),
            ],
            ..Default::default()
        };

        let object = json!(["keep", "drop", "keep-too"]);
        let stripped = strip_on_conflict(&object, &metadata);

        assert_eq!(stripped, json!(["keep", "keep-too"]));
    }

    #[test]
    fn test_metadata_roundtrip() {
        let metadata = replicas_on_conflict();
        let encoded = serde_json::to_string(&metadata).unwrap();
        let decoded: FieldMetadata = serde_json::from_str(&encoded).unwrap();
        assert_eq!(metadata, decoded);
    }
}
