//! Checksums and deterministic ids for evidence records
//!
//! ## Determinism Guarantees
//!
//! - Object keys are sorted recursively before hashing, so two records that
//!   differ only in key order share a checksum
//! - The `checksum` field of a record never contributes to its own checksum
//! - Array order is significant

use crate::layout::RecordKind;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Name of the checksum field inside a record envelope
pub const CHECKSUM_FIELD: &str = "checksum";

/// Hex-encoded SHA-256 of `bytes` (64 characters)
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Compact JSON text with recursively sorted object keys
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
                write_canonical(&map[key.as_str()], out);
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

/// Checksum of a record envelope, excluding its `checksum` field.
///
/// ## Arguments
///
/// - `record`: the persisted envelope; non-object values are hashed whole
///
/// ## Returns
///
/// Hex-encoded SHA-256 over the canonical JSON of the record
pub fn record_checksum(record: &Value) -> String {
    match record {
        Value::Object(map) if map.contains_key(CHECKSUM_FIELD) => {
            let mut without = map.clone();
            without.remove(CHECKSUM_FIELD);
            sha256_hex(canonical_json(&Value::Object(without)).as_bytes())
        }
        other => sha256_hex(canonical_json(other).as_bytes()),
    }
}

/// Deterministic record id for a payload written without an explicit id.
///
/// The same payload saved twice in one session maps to the same record,
/// so the second save overwrites the first.
pub fn derive_record_id(kind: RecordKind, payload: &Value, session_id: &str) -> String {
    let mut material = canonical_json(payload);
    material.push('\n');
    material.push_str(session_id);
    let digest = sha256_hex(material.as_bytes());
    format!("{}_{}", kind.id_prefix(), &digest[..16])
}

/// Id of a streaming observation record.
///
/// Stable over `(session_id, file_index, file_path)`: a resumed session
/// that re-processes a file rewrites the same record instead of adding a
/// duplicate.
pub fn observation_id(session_id: &str, file_index: u64, file_path: &str) -> String {
    let material = format!("{}\n{}\n{}", session_id, file_index, file_path);
    let digest = sha256_hex(material.as_bytes());
    format!("{}_{}", RecordKind::Observation.id_prefix(), &digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let value = json!({"b": 1, "a": {"z": true, "y": [3, {"d": null, "c": "x"}]}});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"y":[3,{"c":"x","d":null}],"z":true},"b":1}"#
        );
    }

    #[test]
    fn test_record_checksum_ignores_checksum_field() {
        let bare = json!({"id": "r1", "payload": {"n": 1}});
        let mut with = bare.clone();
        with["checksum"] = json!("deadbeef");

        assert_eq!(record_checksum(&bare), record_checksum(&with));
    }

    #[test]
    fn test_record_checksum_detects_payload_change() {
        let a = json!({"id": "r1", "payload": {"n": 1}});
        let b = json!({"id": "r1", "payload": {"n": 2}});
        assert_ne!(record_checksum(&a), record_checksum(&b));
    }

    #[test]
    fn test_derive_record_id_is_stable() {
        let payload = json!({"q": "who calls main?"});
        let a = derive_record_id(RecordKind::Question, &payload, "s1");
        let b = derive_record_id(RecordKind::Question, &payload, "s1");
        let c = derive_record_id(RecordKind::Question, &payload, "s2");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("qst_"));
        assert_eq!(a.len(), 4 + 16);
    }

    #[test]
    fn test_observation_id_depends_on_index_and_path() {
        let a = observation_id("s1", 0, "src/a.rs");
        assert_eq!(a, observation_id("s1", 0, "src/a.rs"));
        assert_ne!(a, observation_id("s1", 1, "src/a.rs"));
        assert_ne!(a, observation_id("s1", 0, "src/b.rs"));
        assert!(a.starts_with("obs_"));
    }
}
