//! Content hashing for catalogs and documents.
//!
//! A catalog's fingerprint is the SHA-256 of its canonical JSON form. Two
//! catalogs with the same layouts therefore share a fingerprint regardless of
//! how they were built.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// A 32-byte SHA-256 content hash.
pub type ContentHash = [u8; 32];

/// Compute the SHA-256 content hash of any serializable value.
pub fn content_hash<T: Serialize>(value: &T) -> Result<ContentHash, serde_json::Error> {
    let json = serde_json::to_vec(value)?;
    Ok(hash_bytes(&json))
}

/// Compute the SHA-256 hash of raw bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Format a content hash as a hex string.
pub fn hash_hex(hash: &ContentHash) -> String {
    hash.iter().map(|b| format!("{b:02x}")).collect()
}
