use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// One-way keyed hash of a raw password: `sha256(raw ++ secret)`, hex encoded.
pub fn hash_password(raw: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Recompute the keyed hash and compare it to `stored` in constant time.
pub fn verify_password(raw: &str, secret: &str, stored: &str) -> bool {
    // ct_eq on slices of different lengths is false without leaking where they differ.
    hash_password(raw, secret)
        .as_bytes()
        .ct_eq(stored.as_bytes())
        .into()
}
