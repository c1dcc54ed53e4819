//! bagtree - merkle fingerprints and storage proofs for bags
//!
//! A bag is a file (or an ordered set of files) registered with a storage
//! node. Before a bag is ordered on-chain it is fingerprinted here:
//!
//! - **Chunks**: the bag's bytes, concatenated in file order and cut into
//!   fixed-size pieces (`DEFAULT_CHUNK_SIZE`, last piece may be shorter)
//! - **Merkle root**: binary SHA256 tree over `sha256(chunk)` leaves; an odd
//!   node at the end of a level is promoted unchanged
//! - **Proofs**: one chunk plus its sibling hashes, so a verifier can
//!   challenge a storage provider without holding the whole bag
//!
//! Work against a live storage node goes through `WorkerPool`, which waits
//! for the bag to be assembled on disk and bounds how many bags are hashed
//! at once.
//!
//! # Example
//!
//! ```rust
//! use bagtree_core::{decode_proof, encode_proof, MerkleTree};
//!
//! let data = b"0123456789";
//! let tree = MerkleTree::from_data(data, 4).unwrap();
//! let bundle = tree.proof_with_chunk(2, b"89".to_vec()).unwrap();
//!
//! let wire = encode_proof(&bundle).unwrap();
//! let decoded = decode_proof(&wire).unwrap();
//! assert!(decoded.verify(&tree.root()));
//! ```

pub mod assembly;
pub mod chunker;
pub mod codec;
pub mod dispatch;
pub mod hash;
pub mod merkle;
pub mod order;
pub mod proof;
pub mod source;
pub mod types;

// Chunking
pub use chunker::{chunk_bytes, BagFile, BagLayout, ChunkError, ChunkReader, DEFAULT_CHUNK_SIZE};

// Merkle tree
pub use merkle::{
    challenge_index, merkle_hash_pair, merkle_level_sizes, merkle_proof_len, merkle_proof_root,
    merkle_root, merkle_verify_proof, MerkleError, MerkleTree,
};

// Proofs and wire format
pub use codec::{decode_proof, encode_proof, CodecError, PROOF_MAGIC, PROOF_VERSION};
pub use proof::{verify as verify_proof, ProofBundle};

// Storage node boundary
pub use assembly::{
    assembled_layout, download_bag, download_succeeded, header_succeeded, request_full_download,
    wait_for_download, wait_for_header, PollIntervals, DOWNLOAD_POLL_INTERVAL, HEADER_POLL_INTERVAL,
};
pub use source::{AddBagRequest, BagDetails, BagPeer, BagSource, MemoryBagSource, SourceError, DEFAULT_DOWNLOAD_PATH};

// Worker pool
pub use dispatch::{DispatchError, Job, JobHandle, JobOutput, PoolConfig, WorkerPool, DEFAULT_MAX_CONCURRENT};

pub use hash::{hash_chunk, sha256, verify};
pub use order::{OrderError, StorageOrder, StorageOrderFields, DEFAULT_STORAGE_PERIOD_SECS};
pub use types::{from_hex, hash_from_u64, to_decimal, to_hex, Hash, ZERO_HASH};

pub use tokio_util::sync::CancellationToken;
