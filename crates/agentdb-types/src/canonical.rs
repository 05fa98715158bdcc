use serde::Serialize;
use serde_json::Value;

use crate::AgentDbError;

/// Produce a deterministic canonical JSON representation.
///
/// Rules:
/// - Object keys sorted lexicographically
/// - No unnecessary whitespace (compact format)
/// - Numbers in their canonical form
/// - Null values included
pub fn canonicalize(value: &Value) -> String {
    match value {
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(canonicalize).collect();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let pairs: Vec<String> = entries
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::from(k.as_str()), canonicalize(v)))
                .collect();
            format!("{{{}}}", pairs.join(","))
        }
        // Scalars already have a single compact rendering.
        scalar => scalar.to_string(),
    }
}

/// Serialize any value and return its canonical JSON bytes.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, AgentDbError> {
    let value =
        serde_json::to_value(value).map_err(|e| AgentDbError::Serialization(e.to_string()))?;
    Ok(canonicalize(&value).into_bytes())
}
