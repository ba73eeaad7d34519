//! Cryptographic utility functions

use rand::RngCore;
use sha2::{Digest, Sha256};

/// One-way salted hash of a label value, returned as hex.
///
/// Deterministic for a fixed (salt, value) pair; not reversible without the
/// salt. The salt itself is never transmitted.
pub fn salted_hash(salt: &str, value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a cryptographically secure random key
pub fn generate_key(len: usize) -> Vec<u8> {
    let mut key = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// Generate a 256-bit (32 byte) signing key
pub fn generate_signing_key() -> Vec<u8> {
    generate_key(32)
}
