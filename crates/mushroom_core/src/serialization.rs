//! Canonical JSON for hashed artifacts
//!
//! Model artifacts, feature schemas and metrics records are written with
//! recursively sorted keys so that re-running a stage on unchanged inputs
//! produces byte-identical files and stable BLAKE3 hashes.

use serde::Serialize;
use serde_json::{ser::PrettyFormatter, Map, Serializer, Value};

use crate::errors::{PipelineError, Result};

/// Sort all object keys recursively
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            let mut sorted = Map::with_capacity(entries.len());
            for (key, val) in entries {
                sorted.insert(key, canonicalize(val));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Compact canonical JSON, used as hash input.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let canonical = canonicalize(serde_json::to_value(value)?);
    Ok(serde_json::to_string(&canonical)?)
}

/// Pretty canonical JSON, used for files humans may open.
pub fn to_canonical_json_pretty<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let canonical = canonicalize(serde_json::to_value(value)?);
    let mut buffer = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"  ");
    let mut serializer = Serializer::with_formatter(&mut buffer, formatter);
    canonical
        .serialize(&mut serializer)
        .map_err(|e| PipelineError::Serialization(e.to_string()))?;
    buffer.push(b'\n');
    Ok(buffer)
}

/// BLAKE3 over the compact canonical form, hex encoded.
pub fn hash_canonical_hex<T: Serialize>(value: &T) -> Result<String> {
    let json = to_canonical_json(value)?;
    Ok(hex::encode(blake3::hash(json.as_bytes()).as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Unordered {
        zeta: i64,
        alpha: i64,
        nested: std::collections::HashMap<String, i64>,
    }

    fn sample() -> Unordered {
        let mut nested = std::collections::HashMap::new();
        nested.insert("b".to_string(), 2);
        nested.insert("a".to_string(), 1);
        Unordered {
            zeta: 26,
            alpha: 1,
            nested,
        }
    }

    #[test]
    fn keys_are_sorted() {
        let json = to_canonical_json(&sample()).unwrap();
        assert_eq!(json, r#"{"alpha":1,"nested":{"a":1,"b":2},"zeta":26}"#);
    }

    #[test]
    fn pretty_output_parses_back() {
        let bytes = to_canonical_json_pretty(&sample()).unwrap();
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["nested"]["b"], 2);
        assert!(bytes.ends_with(b"\n"));
    }

    #[test]
    fn hash_is_stable() {
        let h1 = hash_canonical_hex(&sample()).unwrap();
        let h2 = hash_canonical_hex(&sample()).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }
}
