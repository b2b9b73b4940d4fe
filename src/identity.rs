//! Content-derived identity of records.
//!
//! The identity of a record is the SHA-256 of its canonical JSON form once the
//! fields written by the pipeline itself are removed. Object keys are sorted at
//! every depth, so field insertion order never changes the key.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::dto::{IdentityKey, Record};

/// Fields assigned by the pipeline or by the store. They change between runs
/// and never contribute to identity.
pub const VOLATILE_FIELDS: [&str; 5] = [
    "_id",
    "_unique_id",
    "category",
    "last_updated",
    "date_extraction",
];

pub fn compute_identity(record: &Record) -> IdentityKey {
    let stable: Map<String, Value> = record
        .iter()
        .filter(|(field, _)| !VOLATILE_FIELDS.contains(&field.as_str()))
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect();
    fingerprint(&Value::Object(stable))
}

/// Digest of the named fields only. `None` when one of them is absent, null
/// or an empty string, in which case the caller falls back to the content
/// identity.
pub fn natural_key(record: &Record, fields: &[&str]) -> Option<IdentityKey> {
    let mut selected = Map::new();
    for &field in fields {
        match record.get(field) {
            None | Some(Value::Null) => return None,
            Some(Value::String(s)) if s.trim().is_empty() => return None,
            Some(value) => {
                selected.insert(field.to_string(), value.clone());
            }
        }
    }
    Some(fingerprint(&Value::Object(selected)))
}

/// Digest of an arbitrary JSON value in canonical form.
pub fn fingerprint(value: &Value) -> IdentityKey {
    let bytes = canonical_bytes(value);
    IdentityKey(format!("{:x}", Sha256::digest(&bytes)))
}

pub fn canonical_bytes(value: &Value) -> Vec<u8> {
    // Serializing a `Value` cannot fail: keys are always strings.
    serde_json::to_vec(&canonicalize(value)).unwrap_or_default()
}

// Rebuilds objects with keys inserted in sorted order, which holds whether or
// not serde_json keeps insertion order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                out.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
