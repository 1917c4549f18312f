//! Shared canonicalization for entity names, edge keys, and hash inputs
//!
//! Every name comparison and every content hash in the system goes through
//! this module, so the rules here are part of the storage contract: a change
//! to `canonicalize` changes node identity.

use serde_json::Value;

/// Normalize an entity name to its canonical form.
///
/// Lowercases, trims, and folds internal whitespace runs to single spaces.
/// Idempotent: `canonicalize(canonicalize(x)) == canonicalize(x)`.
pub fn canonicalize(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Stable key aligning validation decisions, edge rows, and evidence.
///
/// Both endpoints are canonicalized; the relationship type is used verbatim.
pub fn edge_key(source: &str, relationship_type: &str, target: &str) -> String {
    format!(
        "{}::{}::{}",
        canonicalize(source),
        relationship_type,
        canonicalize(target)
    )
}

/// Serialize a JSON value with recursively sorted object keys.
///
/// Used for every content hash so that semantically identical inputs produce
/// identical cache keys regardless of field order.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Object keys serialize as plain JSON strings
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonicalize_folds_whitespace_and_case() {
        assert_eq!(canonicalize("  Neural\t Network  "), "neural network");
        assert_eq!(canonicalize("BERT"), "bert");
    }

    #[test]
    fn test_canonicalize_idempotent() {
        let once = canonicalize("  Mixed   Case\nName ");
        assert_eq!(canonicalize(&once), once);
    }

    #[test]
    fn test_edge_key_canonicalizes_endpoints() {
        assert_eq!(edge_key("BERT ", "uses", " GLUE"), "bert::uses::glue");
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let a = json!({"b": 1, "a": {"z": true, "y": [2, 1]}});
        let b = json!({"a": {"y": [2, 1], "z": true}, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":{"y":[2,1],"z":true},"b":1}"#);
    }

    #[test]
    fn test_canonical_json_preserves_array_order() {
        let a = json!([3, 1, 2]);
        assert_eq!(canonical_json(&a), "[3,1,2]");
    }
}
