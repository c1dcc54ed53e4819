//! Binary merkle tree over the chunk sequence of a bag
//!
//! Leaves are `sha256(chunk)`, parents are `sha256(left || right)`. When a
//! level has an odd number of nodes the last one has no partner; it is
//! promoted to the next level unchanged (no padding, no self-duplication).
//! A single-leaf tree therefore has the leaf hash as its root.
//!
//! ```text
//! 3 leaves:        root = H(H(l0 || l1) || l2)
//!                 /                \
//!          H(l0 || l1)              l2   (promoted)
//!           /      \                 |
//!         l0        l1               l2
//! ```

use sha2::{Digest, Sha256};

use crate::hash::hash_chunk;
use crate::proof::ProofBundle;
use crate::types::Hash;

/// Merkle error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MerkleError {
    #[error("Cannot build a merkle tree over an empty chunk sequence")]
    EmptyInput,
    #[error("Leaf index {index} out of range for {leaf_count} leaves")]
    IndexOutOfRange { index: usize, leaf_count: usize },
    #[error("Chunk does not hash to leaf {index}")]
    ChunkMismatch { index: usize },
    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(usize),
}

/// Compute hash of two concatenated hashes (parent = H(left || right))
pub fn merkle_hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Width of every level, leaves first, root (1) last
pub fn merkle_level_sizes(leaf_count: usize) -> Vec<usize> {
    if leaf_count == 0 {
        return vec![];
    }
    let mut sizes = vec![leaf_count];
    let mut width = leaf_count;
    while width > 1 {
        width = width.div_ceil(2);
        sizes.push(width);
    }
    sizes
}

/// Number of sibling hashes in the proof for `leaf_index`
///
/// Levels where the path node is a promoted orphan contribute nothing.
pub fn merkle_proof_len(leaf_index: usize, leaf_count: usize) -> usize {
    let mut idx = leaf_index;
    let mut len = 0;
    for width in merkle_level_sizes(leaf_count) {
        if width == 1 {
            break;
        }
        if (idx ^ 1) < width {
            len += 1;
        }
        idx /= 2;
    }
    len
}

fn next_level(level: &[Hash]) -> Vec<Hash> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => merkle_hash_pair(left, right),
            [orphan] => *orphan,
            _ => unreachable!("chunks(2) yields one or two items"),
        })
        .collect()
}

/// Compute merkle root from leaf hashes
pub fn merkle_root(leaves: &[Hash]) -> Result<Hash, MerkleError> {
    if leaves.is_empty() {
        return Err(MerkleError::EmptyInput);
    }
    let mut current = leaves.to_vec();
    while current.len() > 1 {
        current = next_level(&current);
    }
    Ok(current[0])
}

/// Fold a leaf hash up through its siblings
///
/// `siblings` is ordered from the leaf level upward and must be consumed
/// exactly. Returns None if the index is out of range or the sibling count
/// does not fit the tree shape.
pub fn merkle_proof_root(
    leaf: &Hash,
    leaf_index: usize,
    leaf_count: usize,
    siblings: &[Hash],
) -> Option<Hash> {
    if leaf_index >= leaf_count {
        return None;
    }

    let mut hash = *leaf;
    let mut idx = leaf_index;
    let mut width = leaf_count;
    let mut uncles = siblings.iter();

    while width > 1 {
        if (idx ^ 1) < width {
            let uncle = uncles.next()?;
            hash = if idx & 1 == 0 {
                // Even index - we're on the left, uncle is on right
                merkle_hash_pair(&hash, uncle)
            } else {
                merkle_hash_pair(uncle, &hash)
            };
        }
        idx /= 2;
        width = width.div_ceil(2);
    }

    uncles.next().is_none().then_some(hash)
}

/// Verify a merkle proof against a known root
pub fn merkle_verify_proof(
    leaf: &Hash,
    leaf_index: usize,
    leaf_count: usize,
    siblings: &[Hash],
    root: &Hash,
) -> bool {
    merkle_proof_root(leaf, leaf_index, leaf_count, siblings).is_some_and(|r| r == *root)
}

/// Pick the leaf challenged by a random seed
///
/// The seed is reduced to a byte offset inside the bag, which is then
/// mapped proportionally onto the leaves:
/// `floor((random % total_size) * leaf_count / total_size)`.
pub fn challenge_index(random: u64, total_size: u64, leaf_count: usize) -> Result<usize, MerkleError> {
    if total_size == 0 || leaf_count == 0 {
        return Err(MerkleError::EmptyInput);
    }
    let offset = (random % total_size) as u128;
    Ok((offset * leaf_count as u128 / total_size as u128) as usize)
}

/// Fully materialized merkle tree, stored level by level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    /// levels[0] = leaves, last = [root]
    levels: Vec<Vec<Hash>>,
}

impl MerkleTree {
    /// Build from precomputed leaf hashes
    pub fn from_leaves(leaves: Vec<Hash>) -> Result<Self, MerkleError> {
        if leaves.is_empty() {
            return Err(MerkleError::EmptyInput);
        }
        let mut levels = vec![leaves];
        while let Some(top) = levels.last().filter(|l| l.len() > 1) {
            let parent = next_level(top);
            levels.push(parent);
        }
        Ok(Self { levels })
    }

    /// Hash every chunk of a (fallible) chunk sequence and build the tree
    ///
    /// Chunk bytes are dropped as soon as they are hashed.
    pub fn build<I, C, E>(chunks: I) -> Result<Self, E>
    where
        I: IntoIterator<Item = Result<C, E>>,
        C: AsRef<[u8]>,
        E: From<MerkleError>,
    {
        let mut leaves = Vec::new();
        for chunk in chunks {
            leaves.push(hash_chunk(chunk?.as_ref()));
        }
        Ok(Self::from_leaves(leaves)?)
    }

    /// Build over in-memory data
    pub fn from_data(data: &[u8], chunk_size: usize) -> Result<Self, MerkleError> {
        if chunk_size == 0 {
            return Err(MerkleError::InvalidChunkSize(chunk_size));
        }
        Self::from_leaves(data.chunks(chunk_size).map(hash_chunk).collect())
    }

    /// Rebuild the tree from the chunk sequence and prove one leaf
    ///
    /// Stateless: nothing is cached between calls. Only the challenged
    /// chunk is kept in memory besides the leaf hashes.
    pub fn proof<I, C, E>(chunks: I, index: usize) -> Result<(Self, ProofBundle), E>
    where
        I: IntoIterator<Item = Result<C, E>>,
        C: AsRef<[u8]>,
        E: From<MerkleError>,
    {
        let mut leaves = Vec::new();
        let mut target = None;
        for (i, chunk) in chunks.into_iter().enumerate() {
            let chunk = chunk?;
            let bytes = chunk.as_ref();
            if i == index {
                target = Some(bytes.to_vec());
            }
            leaves.push(hash_chunk(bytes));
        }

        let tree = Self::from_leaves(leaves)?;
        let chunk = target.ok_or(MerkleError::IndexOutOfRange {
            index,
            leaf_count: tree.leaf_count(),
        })?;
        let bundle = tree.proof_with_chunk(index, chunk)?;
        Ok((tree, bundle))
    }

    /// Root hash
    pub fn root(&self) -> Hash {
        // from_leaves guarantees a non-empty top level
        self.levels
            .last()
            .and_then(|top| top.first())
            .copied()
            .unwrap_or_default()
    }

    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    pub fn leaf(&self, index: usize) -> Option<&Hash> {
        self.levels[0].get(index)
    }

    /// Number of levels including leaves and root
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Total stored nodes (promoted orphans are counted once per level)
    pub fn node_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    /// Sibling hashes from leaf level up to just below the root
    pub fn siblings(&self, index: usize) -> Result<Vec<Hash>, MerkleError> {
        if index >= self.leaf_count() {
            return Err(MerkleError::IndexOutOfRange {
                index,
                leaf_count: self.leaf_count(),
            });
        }

        let mut proof = Vec::new();
        let mut idx = index;
        for level in &self.levels[..self.levels.len() - 1] {
            if let Some(sibling) = level.get(idx ^ 1) {
                proof.push(*sibling);
            }
            idx /= 2;
        }
        Ok(proof)
    }

    /// Proof bundle for a prebuilt tree; `chunk` must be the leaf's bytes
    pub fn proof_with_chunk(&self, index: usize, chunk: Vec<u8>) -> Result<ProofBundle, MerkleError> {
        let siblings = self.siblings(index)?;
        if hash_chunk(&chunk) != self.levels[0][index] {
            return Err(MerkleError::ChunkMismatch { index });
        }
        Ok(ProofBundle {
            leaf_index: index as u64,
            leaf_count: self.leaf_count() as u64,
            siblings,
            chunk,
        })
    }
}
