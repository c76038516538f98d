//! Content fingerprints for raw payloads
//!
//! A fingerprint is the hex SHA-256 of the payload's canonical JSON encoding.
//! `serde_json` keeps object keys in sorted order, so two documents that only
//! differ in key order hash identically.

use crate::error::Result;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Compute the SHA-256 of raw bytes as lowercase hex
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Fingerprint a JSON payload
pub fn payload_fingerprint(payload: &Value) -> Result<String> {
    let canonical = serde_json::to_vec(payload)?;
    Ok(sha256_hex(&canonical))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sha256_hex_known_value() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": {"y": 2, "x": 3}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": {"x": 3, "y": 2}, "b": 1}"#).unwrap();
        assert_eq!(payload_fingerprint(&a).unwrap(), payload_fingerprint(&b).unwrap());
    }

    #[test]
    fn test_fingerprint_detects_changes() {
        let before = json!({ "items": [{ "name": "Coffee", "quantity": 2 }] });
        let after = json!({ "items": [{ "name": "Coffee", "quantity": 3 }] });
        assert_ne!(
            payload_fingerprint(&before).unwrap(),
            payload_fingerprint(&after).unwrap()
        );
    }

    #[test]
    fn test_fingerprint_array_order_matters() {
        let a = json!([1, 2]);
        let b = json!([2, 1]);
        assert_ne!(payload_fingerprint(&a).unwrap(), payload_fingerprint(&b).unwrap());
    }
}
