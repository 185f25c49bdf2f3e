//! Utility functions for Weaver
//!
//! Small helpers shared by the history backends, the assembler and the CLI:
//! hashing, repository path joining and time normalization.

use sha2::{Digest, Sha256};

/// Hash arbitrary data with SHA-256, hex encoded
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Join a repository-relative directory path and an entry name with `/`
///
/// The root directory is the empty string, so its entries keep their bare name.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Map a timestamp onto `[0, 1]` between `start` and `end`
///
/// A zero-length span (every commit shares one timestamp) maps to `0.0`.
pub fn normalize_time(timestamp: i64, start: i64, end: i64) -> f64 {
    if end == start {
        return 0.0;
    }
    // f64 so spans near the i64 limits cannot overflow
    (timestamp as f64 - start as f64) / (end as f64 - start as f64)
}

/// First eight characters of a hash for log output
pub fn short_hash(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}
