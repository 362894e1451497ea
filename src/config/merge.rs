//! Merging of configuration documents
//!
//! Maps merge key by key, lists are concatenated, anything else is replaced
//! by the later value.

use serde_json::{Map, Value};

/// Merge `overlay` into `base`
pub fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => merge_maps(base, overlay),
        (Value::Array(base), Value::Array(overlay)) => base.extend(overlay),
        (base, Value::Null) if !base.is_null() => {}
        (base, overlay) => *base = overlay,
    }
}

/// Merge the keys of `overlay` into `base`
pub fn merge_maps(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (key, value) in overlay {
        match base.get_mut(&key) {
            Some(existing) => merge_values(existing, value),
            None => {
                base.insert(key, value);
            }
        }
    }
}
