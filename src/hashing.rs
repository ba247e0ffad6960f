//! Hashing - SHA-256 Fingerprints
//!
//! Content hashes for source assets and a stable fingerprint of the brief a
//! report was produced from.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt::Write;

/// SHA-256 of bytes as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().fold(String::with_capacity(64), |mut out, b| {
        let _ = write!(out, "{:02x}", b);
        out
    })
}

/// Serialize with object keys sorted at every depth, no whitespace.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v = serde_json::to_value(value)?;
    serde_json::to_string(&sorted(v))
}

fn sorted(v: Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, sorted(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}

/// brief_fingerprint = sha256(canonical_brief + ":" + engine_version)
///
/// Two runs over the same brief with the same engine share a fingerprint
/// regardless of key order in the source file.
pub fn brief_fingerprint<T: Serialize>(brief: &T, engine_version: &str) -> Result<String, serde_json::Error> {
    let canonical = canonical_json(brief)?;
    Ok(sha256_hex(format!("{}:{}", canonical, engine_version).as_bytes()))
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
        let obj = json!({"z": 1, "a": {"y": 2, "b": [ {"d": 1, "c": 2} ]}});
        assert_eq!(canonical_json(&obj).unwrap(), r#"{"a":{"b":[{"c":2,"d":1}],"y":2},"z":1}"#);
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a = json!({"campaign_name": "c", "products": [1, 2]});
        let b = json!({"products": [1, 2], "campaign_name": "c"});
        assert_eq!(brief_fingerprint(&a, "1.0.0").unwrap(), brief_fingerprint(&b, "1.0.0").unwrap());
        assert_ne!(brief_fingerprint(&a, "1.0.0").unwrap(), brief_fingerprint(&a, "1.0.1").unwrap());
    }
}
