//! Canonical JSON serialization and hashing for receipt integrity.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Serialize `value` to canonical JSON: object keys sorted, no insignificant
/// whitespace. Two structurally-equal values always produce byte-identical
/// output, which is what makes [`receipt_hash`] stable.
pub fn canonical_json<T: Serialize>(value: &T) -> String {
    // serde_json::Value sorts map keys when the `preserve_order` feature is
    // not enabled; converting through `Value` canonicalizes key order.
    let v = serde_json::to_value(value).expect("value must be serializable");
    serde_json::to_string(&v).expect("canonical value must serialize")
}

/// Hex-encoded SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Compute the `receipt_sha256` for a receipt-shaped value.
///
/// The caller's `value` must be canonicalizable with its hash field already
/// nulled out — hashing a value that embeds its own hash is a contradiction
/// (the hash would have to cover itself), so callers null the field before
/// calling this function and splice the result back in afterward.
#[must_use]
pub fn receipt_hash<T: Serialize>(value_with_null_hash: &T) -> String {
    sha256_hex(canonical_json(value_with_null_hash).as_bytes())
}
