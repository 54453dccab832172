use crate::{AddressRecord, CheckpointKey, StorageError, StoredBlock, StoredTransaction};
use alloy_primitives::{Address, B256};
use std::{collections::BTreeSet, fmt::Debug};

/// Result of inserting a block record at a height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The height was empty and the block has been stored.
    Inserted,
    /// An identical block (same hash) is already stored at the height.
    AlreadyPresent,
    /// A different block is already stored at the height.
    Conflict {
        /// Hash of the block that occupies the height.
        stored_hash: B256,
    },
}

/// Summary of a transaction batch upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    /// Transactions that were not stored before.
    pub inserted: usize,
    /// Transactions already stored under the same block number.
    pub duplicates: usize,
    /// Transactions moved from another block number.
    pub relocated: usize,
}

/// What a purge removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeSummary {
    /// The block record that was stored at the height, if any.
    pub block: Option<StoredBlock>,
    /// Number of transactions removed together with it.
    pub transactions: usize,
}

/// Read access to stored blocks and their transactions.
///
/// Implementations must be safe to share between the ingestion tasks.
pub trait BlockStorageReader {
    /// Returns the block stored at `number`, if any.
    fn get_block(&self, number: u64) -> Result<Option<StoredBlock>, StorageError>;

    /// Returns the highest stored block, if any.
    fn latest_block(&self) -> Result<Option<StoredBlock>, StorageError>;

    /// Returns the transaction with the given hash, if any.
    fn get_transaction(&self, hash: B256) -> Result<Option<StoredTransaction>, StorageError>;

    /// Returns all transactions indexed under the block at `number`.
    fn block_transactions(&self, number: u64) -> Result<Vec<StoredTransaction>, StorageError>;

    /// Returns the number of transactions indexed under the block at `number`.
    fn block_transaction_count(&self, number: u64) -> Result<u64, StorageError>;
}

/// Write access to blocks and transactions.
///
/// Every operation is idempotent: repeating it with the same input leaves the
/// store unchanged.
pub trait BlockStorageWriter {
    /// Inserts a block record keyed by its number.
    ///
    /// An occupied height is never overwritten. The outcome reports whether the
    /// occupant is the same block or a conflicting one.
    fn insert_block(&self, block: StoredBlock) -> Result<InsertOutcome, StorageError>;

    /// Inserts or relocates a batch of transactions.
    ///
    /// The batch is written in a single storage transaction: either every entry
    /// is applied or none is.
    fn upsert_transactions(
        &self,
        transactions: &[StoredTransaction],
    ) -> Result<UpsertSummary, StorageError>;

    /// Atomically removes the block at `number` and every transaction whose
    /// `block_number` equals `number`.
    fn purge_block(&self, number: u64) -> Result<PurgeSummary, StorageError>;
}

/// Storage of account balance snapshots.
pub trait AddressStorage {
    /// Returns every address that appears as a block miner, or as sender or
    /// recipient of a transaction, in blocks with `timestamp >= since`.
    fn active_addresses_since(&self, since: u64) -> Result<BTreeSet<Address>, StorageError>;

    /// Inserts or replaces the record for `record.address`.
    fn upsert_address(&self, record: AddressRecord) -> Result<(), StorageError>;

    /// Returns the record for `address`, if any.
    fn get_address(&self, address: Address) -> Result<Option<AddressRecord>, StorageError>;
}

/// Storage of progress markers.
pub trait CheckpointStorage {
    /// Returns the value stored under `key`, if any.
    fn get_checkpoint(&self, key: CheckpointKey) -> Result<Option<u64>, StorageError>;

    /// Stores `value` under `key`.
    fn set_checkpoint(&self, key: CheckpointKey, value: u64) -> Result<(), StorageError>;
}

/// Everything the ingestion engine needs from a datastore.
pub trait IndexStorage:
    BlockStorageReader
    + BlockStorageWriter
    + AddressStorage
    + CheckpointStorage
    + Send
    + Sync
    + Debug
    + 'static
{
}

impl<T> IndexStorage for T where
    T: BlockStorageReader
        + BlockStorageWriter
        + AddressStorage
        + CheckpointStorage
        + Send
        + Sync
        + Debug
        + 'static
{
}
