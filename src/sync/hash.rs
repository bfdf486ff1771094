//! Content addressing for audio payloads.
//!
//! Blobs are keyed by the SHA256 of their bytes, so the same recording
//! uploaded twice is stored once and a key always identifies exactly one
//! payload on every device.

use sha2::{Digest, Sha256};

/// Compute the blob key (lowercase hex SHA256) for a payload.
#[must_use]
pub fn blob_key(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Whether `key` has the shape of a blob key.
#[must_use]
pub fn is_blob_key(key: &str) -> bool {
    key.len() == 64 && key.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Check that `data` is the payload `key` names.
#[must_use]
pub fn verify_blob(key: &str, data: &[u8]) -> bool {
    blob_key(data) == key
}
