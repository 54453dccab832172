//! Persistence of fetched blocks.

use crate::{ChainBlock, Metrics, WriterError};
use alloy_primitives::U256;
use chainvault_storage::{
    IndexStorage, InsertOutcome, PurgeSummary, StoredBlock, StoredTransaction,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Renders `value` in base units as a decimal string in units of
/// `10^decimals`, without trailing zeros.
///
/// Above 77 decimals the scale exceeds every 256-bit value, so the whole part
/// is always zero.
pub fn to_decimal_string(value: U256, decimals: u8) -> String {
    let (whole, fraction) = match U256::from(10u8).checked_pow(U256::from(decimals)) {
        Some(scale) => value.div_rem(scale),
        None => (U256::ZERO, value),
    };
    if fraction.is_zero() {
        return whole.to_string();
    }
    let fraction = format!("{:0>width$}", fraction.to_string(), width = decimals as usize);
    format!("{whole}.{}", fraction.trim_end_matches('0'))
}

/// Projects a fetched block onto its stored record.
pub(crate) fn stored_block(block: &ChainBlock) -> StoredBlock {
    StoredBlock {
        number: block.number,
        hash: block.hash,
        parent_hash: block.parent_hash,
        timestamp: block.timestamp,
        miner: block.miner,
        extra_data: block.extra_data.clone(),
        transactions_count: block.transaction_count,
    }
}

/// Writes blocks and their transactions to the datastore.
///
/// Transactions are written before the block record, in batches. If any batch
/// fails the block record is not written, so a partially written block is
/// always a missing height that gap filling and backfill repair.
#[derive(Debug)]
pub struct BlockWriter<DB> {
    db: Arc<DB>,
    batch_size: usize,
    decimals: u8,
}

impl<DB> BlockWriter<DB>
where
    DB: IndexStorage,
{
    /// Creates a writer with the given transaction batch size and unit decimals.
    pub const fn new(db: Arc<DB>, batch_size: usize, decimals: u8) -> Self {
        Self { db, batch_size, decimals }
    }

    /// Returns the underlying datastore.
    pub const fn db(&self) -> &Arc<DB> {
        &self.db
    }

    /// Persists `block` and its transactions.
    ///
    /// Storing a block twice is a no-op reported as
    /// [`InsertOutcome::AlreadyPresent`]. A different block occupying the
    /// height is left in place and reported as [`InsertOutcome::Conflict`].
    pub fn store(&self, block: &ChainBlock) -> Result<InsertOutcome, WriterError> {
        let found = block.transactions.len() as u64;
        if found != block.transaction_count {
            return Err(WriterError::IncompleteBlock {
                number: block.number,
                expected: block.transaction_count,
                found,
            });
        }

        let transactions: Vec<StoredTransaction> = block
            .transactions
            .iter()
            .map(|tx| StoredTransaction {
                hash: tx.hash,
                block_number: block.number,
                from: tx.from,
                to: tx.to,
                value: to_decimal_string(tx.value, self.decimals),
                timestamp: block.timestamp,
            })
            .collect();

        let mut failed = 0;
        let mut total = 0;
        for (batch, chunk) in transactions.chunks(self.batch_size.max(1)).enumerate() {
            total += 1;
            match self.db.upsert_transactions(chunk) {
                Ok(summary) => {
                    debug!(
                        target: "writer",
                        block_number = block.number,
                        batch,
                        inserted = summary.inserted,
                        duplicates = summary.duplicates,
                        relocated = summary.relocated,
                        "Stored transaction batch"
                    );
                    Metrics::record_transactions_stored(summary.inserted + summary.relocated);
                }
                Err(err) => {
                    error!(
                        target: "writer",
                        block_number = block.number,
                        batch,
                        %err,
                        "Failed to store transaction batch"
                    );
                    Metrics::record_failed_batch();
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            return Err(WriterError::FailedBatches { number: block.number, failed, total });
        }

        let outcome = self.db.insert_block(stored_block(block))?;
        Metrics::record_block_stored(&outcome);

        match outcome {
            InsertOutcome::Inserted => info!(
                target: "writer",
                block_number = block.number,
                block_hash = %block.hash,
                transactions = block.transaction_count,
                "Stored block"
            ),
            InsertOutcome::AlreadyPresent => {
                debug!(target: "writer", block_number = block.number, "Block already stored")
            }
            InsertOutcome::Conflict { stored_hash } => warn!(
                target: "writer",
                block_number = block.number,
                block_hash = %block.hash,
                %stored_hash,
                "Height occupied by a different block"
            ),
        }
        Ok(outcome)
    }

    /// Removes the block at `number` together with its transactions.
    pub fn purge(&self, number: u64) -> Result<PurgeSummary, WriterError> {
        let summary = self.db.purge_block(number)?;
        debug!(
            target: "writer",
            block_number = number,
            removed_block = summary.block.is_some(),
            transactions = summary.transactions,
            "Purged block"
        );
        Ok(summary)
    }

    /// Returns `true` if every transaction announced by `block` is stored.
    pub fn transactions_consistent(&self, block: &StoredBlock) -> Result<bool, WriterError> {
        let stored = self.db.block_transaction_count(block.number)?;
        Ok(stored == block.transactions_count)
    }
}
