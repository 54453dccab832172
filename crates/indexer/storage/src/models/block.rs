//! Models for storing block records in the database.
//!
//! Each block is uniquely identified by its number; at most one block is
//! stored per height.

use alloy_primitives::{Address, B256, Bytes};
use reth_db_api::table::Table;
use serde::{Deserialize, Serialize};

/// A block as persisted by the indexer.
///
/// It captures the header fields needed to verify canonical linkage
/// (`hash`, `parent_hash`) together with the display fields served by the
/// read layer. It is stored as the value in the [`Blocks`] table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredBlock {
    /// Height of the block.
    pub number: u64,
    /// The hash of the block itself.
    pub hash: B256,
    /// The hash of the parent block (previous block in the chain).
    pub parent_hash: B256,
    /// The timestamp of the block (seconds since Unix epoch).
    pub timestamp: u64,
    /// Beneficiary of the block reward.
    pub miner: Address,
    /// Arbitrary data included by the block producer.
    pub extra_data: Bytes,
    /// Number of transactions included in the block.
    pub transactions_count: u64,
}

/// A table for storing blocks by block number.
///
/// This is a standard table (not dup-sorted) where:
/// - **Key**: `u64`: block number
/// - **Value**: [`StoredBlock`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct Blocks;

impl Table for Blocks {
    const NAME: &'static str = "blocks";

    const DUPSORT: bool = false;

    type Key = u64;

    type Value = StoredBlock;
}
