//! Content fingerprints for duplicate detection
//!
//! A fingerprint is `<id>:<sha256 of the canonical encoding>`. The canonical
//! encoding sorts object keys at every depth, so the same logical message
//! always hashes the same regardless of how its fields were ordered.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::messages::JsonRpcResponse;

/// Stable identity of a message
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encode a value with object keys sorted recursively
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
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
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
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Hex SHA-256 of the canonical encoding
pub fn content_hash(value: &Value) -> String {
    hex::encode(Sha256::digest(canonical_json(value).as_bytes()))
}

/// Fingerprint an arbitrary value under an id
pub fn fingerprint_value(id: &str, value: &Value) -> Fingerprint {
    Fingerprint(format!("{}:{}", id, content_hash(value)))
}

/// Fingerprint a response (id plus hash of the whole envelope)
pub fn fingerprint_response(response: &JsonRpcResponse) -> Fingerprint {
    let value = serde_json::to_value(response).unwrap_or(Value::Null);
    fingerprint_value(response.id.as_str(), &value)
}

/// Fingerprint a connection-lifecycle event by kind
///
/// Per-connection details are deliberately left out so each kind of event is
/// surfaced once per process.
pub fn lifecycle_fingerprint(kind: &str) -> Fingerprint {
    fingerprint_value("lifecycle", &Value::String(kind.to_string()))
}
