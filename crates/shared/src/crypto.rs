//! Hashing and token utilities for export request fingerprints and job ids.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Computes SHA-256 hash of the input and returns it as a hex string.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generates an opaque, URL-safe token with the given prefix.
///
/// The random part carries 96 bits of entropy, e.g. `events_Zk3v9Qx2mB1cYt7a`.
pub fn generate_token(prefix: &str) -> String {
    let random_bytes: [u8; 12] = rand::thread_rng().gen();
    format!("{}_{}", prefix, URL_SAFE_NO_PAD.encode(random_bytes))
}
