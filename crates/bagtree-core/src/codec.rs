//! Binary wire format for proof bundles
//!
//! Layout (version 1, integers big-endian):
//!
//! ```text
//! magic     4   "BTPF"
//! version   1   0x01
//! index     8   leaf index
//! count     8   leaf count
//! n         2   number of sibling hashes
//! siblings  32 * n
//! len       4   chunk length
//! chunk     len
//! ```
//!
//! The sibling count is checked against `(index, count)` on decode, so a
//! verifier never has to guess which levels promoted an orphan.

use crate::merkle::merkle_proof_len;
use crate::proof::ProofBundle;
use crate::types::Hash;

/// Leading bytes of every encoded proof
pub const PROOF_MAGIC: [u8; 4] = *b"BTPF";

/// Current wire version
pub const PROOF_VERSION: u8 = 1;

const HEADER_LEN: usize = 4 + 1 + 8 + 8 + 2;

/// Error type for codec operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Invalid magic bytes")]
    InvalidMagic,
    #[error("Unsupported proof version: {0}")]
    UnsupportedVersion(u8),
    #[error("Truncated input: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("Trailing bytes after proof: {0}")]
    TrailingBytes(usize),
    #[error("Too many sibling hashes: {0}")]
    TooManySiblings(usize),
    #[error("Chunk too large: {0} bytes")]
    ChunkTooLarge(usize),
    #[error("Leaf index {index} out of range for {leaf_count} leaves")]
    IndexOutOfRange { index: u64, leaf_count: u64 },
    #[error("Sibling count {actual} does not match tree shape (expected {expected})")]
    SiblingCount { expected: usize, actual: usize },
}

/// Encode a proof bundle
pub fn encode_proof(bundle: &ProofBundle) -> Result<Vec<u8>, CodecError> {
    let sibling_count = u16::try_from(bundle.siblings.len())
        .map_err(|_| CodecError::TooManySiblings(bundle.siblings.len()))?;
    let chunk_len = u32::try_from(bundle.chunk.len())
        .map_err(|_| CodecError::ChunkTooLarge(bundle.chunk.len()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + bundle.siblings.len() * 32 + 4 + bundle.chunk.len());
    out.extend_from_slice(&PROOF_MAGIC);
    out.push(PROOF_VERSION);
    out.extend_from_slice(&bundle.leaf_index.to_be_bytes());
    out.extend_from_slice(&bundle.leaf_count.to_be_bytes());
    out.extend_from_slice(&sibling_count.to_be_bytes());
    for sibling in &bundle.siblings {
        out.extend_from_slice(sibling);
    }
    out.extend_from_slice(&chunk_len.to_be_bytes());
    out.extend_from_slice(&bundle.chunk);
    Ok(out)
}

/// Cursor over the input that reports truncation precisely
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.data.len()).ok_or(
            CodecError::Truncated {
                needed: self.pos.saturating_add(n),
                available: self.data.len(),
            },
        )?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }
}

/// Decode a proof bundle
pub fn decode_proof(data: &[u8]) -> Result<ProofBundle, CodecError> {
    let mut r = Reader { data, pos: 0 };

    if r.array::<4>()? != PROOF_MAGIC {
        return Err(CodecError::InvalidMagic);
    }
    let [version] = r.array::<1>()?;
    if version != PROOF_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let leaf_index = u64::from_be_bytes(r.array()?);
    let leaf_count = u64::from_be_bytes(r.array()?);
    if leaf_index >= leaf_count {
        return Err(CodecError::IndexOutOfRange { index: leaf_index, leaf_count });
    }

    let sibling_count = u16::from_be_bytes(r.array()?) as usize;
    let expected = match (usize::try_from(leaf_index), usize::try_from(leaf_count)) {
        (Ok(i), Ok(c)) => merkle_proof_len(i, c),
        _ => return Err(CodecError::IndexOutOfRange { index: leaf_index, leaf_count }),
    };
    if sibling_count != expected {
        return Err(CodecError::SiblingCount {
            expected,
            actual: sibling_count,
        });
    }

    let mut siblings: Vec<Hash> = Vec::with_capacity(sibling_count);
    for _ in 0..sibling_count {
        siblings.push(r.array()?);
    }

    let chunk_len = u32::from_be_bytes(r.array()?) as usize;
    let chunk = r.take(chunk_len)?.to_vec();

    let trailing = data.len() - r.pos;
    if trailing != 0 {
        return Err(CodecError::TrailingBytes(trailing));
    }

    Ok(ProofBundle {
        leaf_index,
        leaf_count,
        siblings,
        chunk,
    })
}
