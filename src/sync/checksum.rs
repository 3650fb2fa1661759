//! SHA-256 content fingerprints for synced files

use sha2::{Digest, Sha256};

/// Fingerprint of an in-memory payload
pub fn fingerprint_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
