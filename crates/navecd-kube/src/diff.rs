//! Cluster diff rendering
//!
//! Compares the live object against the server-side dry-run merge of the
//! declared state and renders the difference line by line, marker style:
//! `+` added, `~` updated, `-` removed, ` ` unchanged.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use navecd_core::ExtendedObject;

use crate::client::{ApplyOptions, ClusterClient};
use crate::error::Result;

/// The kind of change of one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    Add,
    Delete,
    Update,
    NoDiff,
}

impl DiffType {
    pub fn marker(&self) -> char {
        match self {
            DiffType::Add => '+',
            DiffType::Delete => '-',
            DiffType::Update => '~',
            DiffType::NoDiff => ' ',
        }
    }
}

/// One rendered line of a difference.
#[derive(Debug, Clone)]
pub struct DiffLine {
    pub node: String,
    pub value: String,
    pub diff_type: DiffType,
    pub indentation: String,
}

/// The difference between the live and the merged object.
#[derive(Debug, Default)]
pub struct Difference {
    pub lines: Vec<DiffLine>,
}

impl Difference {
    pub fn has_changes(&self) -> bool {
        self.lines
            .iter()
            .any(|line| line.diff_type != DiffType::NoDiff)
    }
}

impl std::fmt::Display for Difference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for line in &self.lines {
            if line.value.is_empty() {
                writeln!(f, "{}{}{}:", line.diff_type.marker(), line.indentation, line.node)?;
            } else {
                writeln!(
                    f,
                    "{}{}{}: {}",
                    line.diff_type.marker(),
                    line.indentation,
                    line.node,
                    line.value
                )?;
            }
        }
        Ok(())
    }
}

/// Computes the difference a declared object would cause on the cluster.
pub struct Differ<'a> {
    pub client: &'a dyn ClusterClient,
    pub field_manager: &'a str,
}

impl Differ<'_> {
    pub async fn diff(
        &self,
        target: &ExtendedObject,
        _cancel: &CancellationToken,
    ) -> Result<Difference> {
        let actual = self
            .client
            .get(&target.type_meta(), target.name(), target.namespace())
            .await?
            .unwrap_or(Value::Object(Default::default()));

        // A dry-run apply yields the server's view of the merged state;
        // conflicts fall back to comparing against the declared object.
        let merged = match self
            .client
            .apply(
                &target.object,
                self.field_manager,
                ApplyOptions {
                    force: false,
                    dry_run: true,
                },
            )
            .await
        {
            Ok(()) => target.object.clone(),
            Err(err) if err.is_conflict() => target.object.clone(),
            Err(err) => return Err(err),
        };

        Ok(Difference {
            lines: compare(&actual, &merged, ""),
        })
    }
}

fn compare(actual: &Value, target: &Value, indentation: &str) -> Vec<DiffLine> {
    let empty = serde_json::Map::new();
    let actual_map = actual.as_object().unwrap_or(&empty);
    let target_map = target.as_object().unwrap_or(&empty);

    let mut lines = Vec::new();

    for (key, actual_value) in actual_map {
        match target_map.get(key) {
            Some(target_value) => match (actual_value, target_value) {
                (Value::Object(_), Value::Object(_)) => {
                    lines.push(DiffLine {
                        node: key.clone(),
                        value: String::new(),
                        diff_type: DiffType::NoDiff,
                        indentation: indentation.to_string(),
                    });
                    lines.extend(compare(
                        actual_value,
                        target_value,
                        &format!("{indentation}  "),
                    ));
                }
                (actual_value, target_value) if actual_value == target_value => {
                    lines.push(DiffLine {
                        node: key.clone(),
                        value: render_scalar(actual_value),
                        diff_type: DiffType::NoDiff,
                        indentation: indentation.to_string(),
                    });
                }
                (_, target_value) => {
                    lines.push(DiffLine {
                        node: key.clone(),
                        value: render_scalar(target_value),
                        diff_type: DiffType::Update,
                        indentation: indentation.to_string(),
                    });
                }
            },
            None => {
                lines.push(DiffLine {
                    node: key.clone(),
                    value: render_scalar(actual_value),
                    diff_type: DiffType::Delete,
                    indentation: indentation.to_string(),
                });
            }
        }
    }

    for (key, target_value) in target_map {
        if actual_map.contains_key(key) {
            continue;
        }
        match target_value {
            Value::Object(_) => {
                lines.push(DiffLine {
                    node: key.clone(),
                    value: String::new(),
                    diff_type: DiffType::Add,
                    indentation: indentation.to_string(),
                });
                lines.extend(print_node(
                    target_value,
                    &format!("{indentation}  "),
                    DiffType::Add,
                ));
            }
            _ => {
                lines.push(DiffLine {
                    node: key.clone(),
                    value: render_scalar(target_value),
                    diff_type: DiffType::Add,
                    indentation: indentation.to_string(),
                });
            }
        }
    }

    lines
}

fn print_node(node: &Value, indentation: &str, diff_type: DiffType) -> Vec<DiffLine> {
    let mut lines = Vec::new();
    let Some(map) = node.as_object() else {
        return lines;
    };

    for (key, value) in map {
        match value {
            Value::Object(_) => {
                lines.push(DiffLine {
                    node: key.clone(),
                    value: String::new(),
                    diff_type,
                    indentation: indentation.to_string(),
                });
                lines.extend(print_node(value, &format!("{indentation}  "), diff_type));
            }
            _ => {
                lines.push(DiffLine {
                    node: key.clone(),
                    value: render_scalar(value),
                    diff_type,
                    indentation: indentation.to_string(),
                });
            }
        }
    }

    lines
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(render_scalar).collect();
            format!("[{}]", rendered.join(", "))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::RecordingClusterClient;
    use serde_json::json;

    fn object(replicas: u64) -> ExtendedObject {
        ExtendedObject::new(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "app", "namespace": "prod"},
            "spec": {"replicas": replicas},
        }))
    }

    #[tokio::test]
    async fn test_no_changes() {
        let client = RecordingClusterClient::new();
        client.seed(object(1).object);

        let differ = Differ {
            client: &client,
            field_manager: "navecd",
        };
        let diff = differ.diff(&object(1), &CancellationToken::new()).await.unwrap();

        assert!(!diff.has_changes());
    }

    #[tokio::test]
    async fn test_update_is_marked() {
        let client = RecordingClusterClient::new();
        client.seed(object(2).object);

        let differ = Differ {
            client: &client,
            field_manager: "navecd",
        };
        let diff = differ.diff(&object(1), &CancellationToken::new()).await.unwrap();

        assert!(diff.has_changes());
        let rendered = diff.to_string();
        assert!(rendered.contains("~  replicas: 1"));
    }

    #[tokio::test]
    async fn test_new_object_is_all_additions() {
        let client = RecordingClusterClient::new();

        let differ = Differ {
            client: &client,
            field_manager: "navecd",
        };
        let diff = differ.diff(&object(1), &CancellationToken::new()).await.unwrap();

        assert!(diff.has_changes());
        assert!(diff
            .lines
            .iter()
            .all(|line| line.diff_type == DiffType::Add));
    }

    #[test]
    fn test_markers() {
        assert_eq!(DiffType::Add.marker(), '+');
        assert_eq!(DiffType::Delete.marker(), '-');
        assert_eq!(DiffType::Update.marker(), '~');
        assert_eq!(DiffType::NoDiff.marker(), ' ');
    }

    #[test]
    fn test_render_scalar_kinds() {
        assert_eq!(render_scalar(&json!("text")), "text");
        assert_eq!(render_scalar(&json!(3)), "3");
        assert_eq!(render_scalar(&json!([1, 2])), "[1, 2]");
    }
}
