//! Deterministic operation keys.

use sha2::{Digest, Sha256};

/// Builds a stable idempotency key from the identifying parts of an inbound
/// event (entity id, message id, command name, ...). Equal parts always yield
/// the same key; the hash keeps arbitrary caller input out of the store's
/// key space.
pub fn operation_key<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_ref().as_bytes());
        hasher.update(b":");
    }
    hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect()
}
