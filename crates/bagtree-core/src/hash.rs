//! Hashing utilities using SHA256

use sha2::{Digest, Sha256};

use crate::types::Hash;

/// Compute SHA256 hash of data
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Verify that data matches expected hash
pub fn verify(hash: &Hash, data: &[u8]) -> bool {
    sha256(data) == *hash
}

/// Leaf hash of a chunk
#[inline]
pub fn hash_chunk(chunk: &[u8]) -> Hash {
    sha256(chunk)
}
