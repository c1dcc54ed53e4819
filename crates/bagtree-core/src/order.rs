//! Fields of the on-chain storage order
//!
//! The contract message carries the bag id as a 256-bit integer next to
//! the merkle root computed here. Building the actual message cell belongs
//! to the wallet layer; this type only gathers and renders the values.

use serde::Serialize;

use crate::types::{from_hex, to_decimal, Hash};

/// Default storage period: 180 days, in seconds
pub const DEFAULT_STORAGE_PERIOD_SECS: u64 = 60 * 60 * 24 * 180;

/// Storage order error type
#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Invalid bag id {bag_id}: {source}")]
    InvalidBagId {
        bag_id: String,
        #[source]
        source: hex::FromHexError,
    },
}

/// Values placed in a storage order message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageOrder {
    /// Bag id read as a big-endian 256-bit integer
    pub torrent_hash: Hash,
    pub file_size: u64,
    pub merkle_hash: Hash,
    pub chunk_size: u32,
    /// Fee in the chain's smallest unit
    pub total_storage_fee: u128,
    pub storage_period_secs: u64,
}

impl StorageOrder {
    pub fn new(bag_id: &str, file_size: u64, merkle_hash: Hash, chunk_size: u32) -> Result<Self, OrderError> {
        let torrent_hash = from_hex(bag_id).map_err(|source| OrderError::InvalidBagId {
            bag_id: bag_id.to_string(),
            source,
        })?;
        Ok(Self {
            torrent_hash,
            file_size,
            merkle_hash,
            chunk_size,
            total_storage_fee: 0,
            storage_period_secs: DEFAULT_STORAGE_PERIOD_SECS,
        })
    }

    pub fn with_fee(mut self, fee: u128) -> Self {
        self.total_storage_fee = fee;
        self
    }

    pub fn with_period(mut self, secs: u64) -> Self {
        self.storage_period_secs = secs;
        self
    }

    /// Numeric rendering, every field a decimal string
    pub fn to_fields(&self) -> StorageOrderFields {
        StorageOrderFields {
            torrent_hash: to_decimal(&self.torrent_hash),
            file_size: self.file_size.to_string(),
            merkle_hash: to_decimal(&self.merkle_hash),
            chunk_size: self.chunk_size.to_string(),
            total_storage_fee: self.total_storage_fee.to_string(),
            storage_period: self.storage_period_secs.to_string(),
        }
    }
}

/// Decimal strings ready for a uint-typed message builder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageOrderFields {
    pub torrent_hash: String,
    pub file_size: String,
    pub merkle_hash: String,
    pub chunk_size: String,
    pub total_storage_fee: String,
    pub storage_period: String,
}
