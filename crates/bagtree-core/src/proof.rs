//! Inclusion proof for one chunk of a bag

use crate::hash::hash_chunk;
use crate::merkle::merkle_proof_root;
use crate::types::Hash;

/// A challenged chunk plus the sibling hashes leading to the root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofBundle {
    /// Position of the chunk in the bag
    pub leaf_index: u64,
    /// Number of chunks in the bag (fixes where orphans were promoted)
    pub leaf_count: u64,
    /// Sibling hashes ordered from the leaf level upward
    pub siblings: Vec<Hash>,
    /// Raw chunk bytes
    pub chunk: Vec<u8>,
}

impl ProofBundle {
    /// Hash of the carried chunk
    pub fn leaf_hash(&self) -> Hash {
        hash_chunk(&self.chunk)
    }

    /// Root implied by the chunk and its siblings
    ///
    /// None if the sibling list does not fit `(leaf_index, leaf_count)`.
    pub fn recompute_root(&self) -> Option<Hash> {
        let index = usize::try_from(self.leaf_index).ok()?;
        let count = usize::try_from(self.leaf_count).ok()?;
        merkle_proof_root(&self.leaf_hash(), index, count, &self.siblings)
    }

    /// Check the bundle against a known root
    pub fn verify(&self, root: &Hash) -> bool {
        self.recompute_root().is_some_and(|r| r == *root)
    }
}

/// Check a bundle against a known root
pub fn verify(bundle: &ProofBundle, root: &Hash) -> bool {
    bundle.verify(root)
}
