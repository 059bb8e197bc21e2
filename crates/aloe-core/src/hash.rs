use sha2::{Digest, Sha256};

/// Hex characters kept from the digest for a cluster signature.
pub const SIGNATURE_LEN: usize = 16;

/// Compute SHA-256 hash of bytes, returning lowercase hex string.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Stable signature over (service, class, masked pattern).
///
/// Fields are joined with the ASCII unit separator so `("a|b", "c")` and
/// `("a", "b|c")` never collide.
pub fn cluster_signature(service: &str, class: &str, pattern: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(service.as_bytes());
    hasher.update([0x1f]);
    hasher.update(class.as_bytes());
    hasher.update([0x1f]);
    hasher.update(pattern.as_bytes());
    let mut hex = hex::encode(hasher.finalize());
    hex.truncate(SIGNATURE_LEN);
    hex
}
