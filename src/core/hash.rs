//! Snapshot Hashing
//!
//! Canonical digests of persisted records. The engine compares the digest
//! of a freshly built snapshot with the last one it wrote and skips the
//! store round-trip when nothing changed.

use serde::Serialize;
use sha2::{Sha256, Digest};

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

/// Errors produced while hashing a record.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    /// The record could not be encoded canonically.
    #[error("Failed to encode record: {0}")]
    Encode(#[from] bincode::Error),
}

/// Compute hash with domain separator.
pub fn hash_with_domain(domain: &[u8], data: &[u8]) -> StateHash {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(data);
    hasher.finalize().into()
}

/// Digest of a serializable record.
///
/// Bincode gives a stable byte layout for a given type, so two records
/// that compare equal field-by-field hash to the same value.
pub fn snapshot_hash<T: Serialize>(record: &T) -> Result<StateHash, HashError> {
    let bytes = bincode::serialize(record)?;
    Ok(hash_with_domain(b"RIPOSTE_SNAPSHOT_V1", &bytes))
}

/// First four bytes of a digest, hex-encoded, for log lines.
pub fn short_hex(hash: &StateHash) -> String {
    hex::encode(&hash[..4])
}
