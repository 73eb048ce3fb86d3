//! Hashing and the hybrid-path key derivation.
//!
//! The hybrid scheme derives its symmetric key as SHA-256 of the raw ECDH
//! shared secret. The construction is pinned for wire compatibility with
//! existing ciphertexts; do not swap in a salted KDF here.

use sha2::{Digest, Sha256};

/// SHA-256 digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Derive the AES-256 key for the hybrid path from an ECDH shared secret.
pub fn derive_key(shared_secret: &[u8]) -> [u8; 32] {
    sha256(shared_secret)
}
