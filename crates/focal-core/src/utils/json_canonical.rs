//! Canonical JSON forms for structural sample equality.
//!
//! Two samples from different nodes agree when their canonical serializations
//! match: compact JSON with object keys sorted recursively, so key order at
//! the wire level never splits a consensus group. The canonical string doubles
//! as the deterministic ordering used by mode tie-breaking and log-field
//! deduplication; [`hash_value`] gives a cheap grouping key for the same form.

use ahash::AHasher;
use serde_json::Value;
use std::hash::{Hash, Hasher};

/// Serializes a JSON value to its canonical compact form.
#[must_use]
pub fn canonical_string(value: &Value) -> String {
    let mut out = String::with_capacity(64);
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (idx, key) in keys.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                // Scalar serialization cannot fail.
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                if let Some(item) = map.get(key) {
                    write_canonical(item, out);
                }
            }
            out.push('}');
        }
        scalar => out.push_str(&serde_json::to_string(scalar).unwrap_or_default()),
    }
}

/// Hashes a JSON value in its canonical form.
///
/// Equal canonical strings always hash equal; used to group window samples
/// without materializing every canonical string twice.
#[must_use]
pub fn hash_value(value: &Value) -> u64 {
    let mut hasher = AHasher::default();
    canonical_string(value).hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_is_irrelevant() {
        let a: Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
        assert_eq!(canonical_string(&a), canonical_string(&b));
        assert_eq!(hash_value(&a), hash_value(&b));
    }

    #[test]
    fn test_nested_objects_sorted() {
        let value = json!({"z": {"b": 1, "a": [{"y": 0, "x": 1}]}});
        assert_eq!(canonical_string(&value), r#"{"z":{"a":[{"x":1,"y":0}],"b":1}}"#);
    }

    #[test]
    fn test_array_order_is_significant() {
        assert_ne!(canonical_string(&json!([1, 2])), canonical_string(&json!([2, 1])));
    }

    #[test]
    fn test_scalars_round_trip() {
        assert_eq!(canonical_string(&json!(1.5)), "1.5");
        assert_eq!(canonical_string(&json!("a\"b")), r#""a\"b""#);
        assert_eq!(canonical_string(&Value::Null), "null");
    }
}
