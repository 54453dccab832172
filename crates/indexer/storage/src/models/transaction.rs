//! Models for storing transactions in the database.
//!
//! Transactions are keyed by hash in [`Transactions`]. The dup-sorted
//! [`BlockTransactions`] table indexes them by the number of the block that
//! included them, so a block and all of its transactions can be purged
//! together.

use alloy_primitives::{Address, B256};
use reth_db_api::table::{DupSort, Table};
use serde::{Deserialize, Serialize};

/// A transaction as persisted by the indexer.
///
/// `value` is already converted from the chain's base unit into a decimal string.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTransaction {
    /// Transaction hash.
    pub hash: B256,
    /// Number of the block that included the transaction.
    pub block_number: u64,
    /// Sender.
    pub from: Address,
    /// Recipient, `None` for contract creation.
    pub to: Option<Address>,
    /// Transferred value in decimal units.
    pub value: String,
    /// Timestamp copied from the including block.
    pub timestamp: u64,
}

/// A table for storing transactions by hash.
///
/// - **Key**: [`B256`]: transaction hash
/// - **Value**: [`StoredTransaction`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct Transactions;

impl Table for Transactions {
    const NAME: &'static str = "transactions";

    const DUPSORT: bool = false;

    type Key = B256;

    type Value = StoredTransaction;
}

/// A dup-sorted index of transaction hashes per block number.
///
/// - **Key**: `u64`: block number
/// - **SubKey / Value**: [`B256`]: transaction hash
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct BlockTransactions;

impl Table for BlockTransactions {
    const NAME: &'static str = "block_transactions";

    const DUPSORT: bool = true;

    type Key = u64;

    type Value = B256;
}

impl DupSort for BlockTransactions {
    type SubKey = B256;
}
