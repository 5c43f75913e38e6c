//! Deep merge for free-form object trees

use serde_json::Value;

/// Recursively merges `overlay` into `target`.
///
/// Objects merge per key; any other value, including arrays, is replaced
/// wholesale by the overlay.
pub fn deep_merge(target: &mut Value, overlay: &Value) {
    match (target, overlay) {
        (Value::Object(target), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match target.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, overlay) => *target = overlay.clone(),
    }
}
