//! Canonical cache keys for shape stream options.
//!
//! Keys are compact JSON with object keys sorted at every depth, so
//! options that differ only in key order map to the same key.

use crate::config::ShapeStreamOptions;
use serde_json::{Map, Value};

/// Recursively rebuild `value` with object keys in ascending UTF-8 byte
/// order. This is not UTF-16 code unit order, so keys mixing characters
/// above U+E000 with astral characters can sort differently than in a
/// JavaScript `sort()`.
///
/// Arrays keep their element order. The map is rebuilt by insertion rather
/// than relying on `serde_json::Map`'s backing type, which changes under the
/// `preserve_order` feature.
pub fn sort_object_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            let mut sorted = Map::new();
            for (key, child) in entries {
                sorted.insert(key.clone(), sort_object_keys(child));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_object_keys).collect()),
        other => other.clone(),
    }
}

pub fn canonicalize(value: &Value) -> String {
    // Display on Value is the compact serializer and cannot fail.
    sort_object_keys(value).to_string()
}

pub fn sorted_options_hash(options: &ShapeStreamOptions) -> String {
    canonicalize(&options.to_value())
}
