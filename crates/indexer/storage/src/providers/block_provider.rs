//! Provider for blocks and the transactions they include.

use crate::{
    InsertOutcome, PurgeSummary, StorageError, StoredBlock, StoredTransaction, UpsertSummary,
    models::{BlockTransactions, Blocks, Transactions},
};
use alloy_primitives::{Address, B256};
use reth_db_api::{
    cursor::DbCursorRO,
    transaction::{DbTx, DbTxMut},
};
use std::collections::BTreeSet;
use tracing::{debug, error, trace};

/// Block and transaction storage over a borrowed database transaction.
pub(crate) struct BlockProvider<'tx, TX> {
    tx: &'tx TX,
}

impl<'tx, TX> BlockProvider<'tx, TX> {
    pub(crate) const fn new(tx: &'tx TX) -> Self {
        Self { tx }
    }
}

impl<TX> BlockProvider<'_, TX>
where
    TX: DbTx,
{
    pub(crate) fn get_block(&self, number: u64) -> Result<Option<StoredBlock>, StorageError> {
        let block = self.tx.get::<Blocks>(number).inspect_err(|err| {
            error!(target: "chainvault_storage", block_number = number, %err, "Failed to read block");
        })?;
        Ok(block)
    }

    pub(crate) fn latest_block(&self) -> Result<Option<StoredBlock>, StorageError> {
        let mut cursor = self.tx.cursor_read::<Blocks>().inspect_err(|err| {
            error!(target: "chainvault_storage", %err, "Failed to get cursor for Blocks");
        })?;
        let last = cursor.last().inspect_err(|err| {
            error!(target: "chainvault_storage", %err, "Failed to seek to last block");
        })?;
        Ok(last.map(|(_, block)| block))
    }

    pub(crate) fn get_transaction(
        &self,
        hash: B256,
    ) -> Result<Option<StoredTransaction>, StorageError> {
        let transaction = self.tx.get::<Transactions>(hash).inspect_err(|err| {
            error!(target: "chainvault_storage", transaction_hash = %hash, %err, "Failed to read transaction");
        })?;
        Ok(transaction)
    }

    fn transaction_hashes(&self, number: u64) -> Result<Vec<B256>, StorageError> {
        let mut cursor = self.tx.cursor_dup_read::<BlockTransactions>().inspect_err(|err| {
            error!(target: "chainvault_storage", %err, "Failed to get dup cursor for BlockTransactions");
        })?;
        let walker = cursor.walk_range(number..=number).inspect_err(|err| {
            error!(target: "chainvault_storage", block_number = number, %err, "Failed to walk transaction index");
        })?;

        let mut hashes = Vec::new();
        for row in walker {
            let (_, hash) = row?;
            hashes.push(hash);
        }
        Ok(hashes)
    }

    pub(crate) fn block_transactions(
        &self,
        number: u64,
    ) -> Result<Vec<StoredTransaction>, StorageError> {
        let mut transactions = Vec::new();
        for hash in self.transaction_hashes(number)? {
            if let Some(transaction) = self.get_transaction(hash)? {
                transactions.push(transaction);
            }
        }
        Ok(transactions)
    }

    pub(crate) fn block_transaction_count(&self, number: u64) -> Result<u64, StorageError> {
        Ok(self.block_transactions(number)?.len() as u64)
    }

    /// Walks blocks from the tip downwards and stops at the first block older
    /// than `since`. Block timestamps are non-decreasing with height.
    pub(crate) fn active_addresses_since(
        &self,
        since: u64,
    ) -> Result<BTreeSet<Address>, StorageError> {
        let mut cursor = self.tx.cursor_read::<Blocks>().inspect_err(|err| {
            error!(target: "chainvault_storage", %err, "Failed to get cursor for Blocks");
        })?;
        let walker = cursor.walk_back(None)?;

        let mut addresses = BTreeSet::new();
        for row in walker {
            let (number, block) = row?;
            if block.timestamp < since {
                break;
            }
            addresses.insert(block.miner);
            for transaction in self.block_transactions(number)? {
                addresses.insert(transaction.from);
                addresses.extend(transaction.to);
            }
        }
        Ok(addresses)
    }
}

impl<TX> BlockProvider<'_, TX>
where
    TX: DbTxMut + DbTx,
{
    pub(crate) fn insert_block(&self, block: StoredBlock) -> Result<InsertOutcome, StorageError> {
        if let Some(stored) = self.get_block(block.number)? {
            if stored.hash == block.hash {
                debug!(
                    target: "chainvault_storage",
                    block_number = block.number,
                    block_hash = %block.hash,
                    "Block already stored"
                );
                return Ok(InsertOutcome::AlreadyPresent);
            }
            return Ok(InsertOutcome::Conflict { stored_hash: stored.hash });
        }

        let number = block.number;
        self.tx.put::<Blocks>(number, block).inspect_err(|err| {
            error!(target: "chainvault_storage", block_number = number, %err, "Failed to store block");
        })?;
        Ok(InsertOutcome::Inserted)
    }

    pub(crate) fn upsert_transactions(
        &self,
        transactions: &[StoredTransaction],
    ) -> Result<UpsertSummary, StorageError> {
        let mut summary = UpsertSummary::default();
        for transaction in transactions {
            match self.get_transaction(transaction.hash)? {
                Some(existing) if existing.block_number == transaction.block_number => {
                    trace!(
                        target: "chainvault_storage",
                        transaction_hash = %transaction.hash,
                        "Transaction already stored"
                    );
                    summary.duplicates += 1;
                    continue;
                }
                Some(existing) => {
                    self.tx
                        .delete::<BlockTransactions>(existing.block_number, Some(transaction.hash))?;
                    summary.relocated += 1;
                }
                None => summary.inserted += 1,
            }

            self.tx.put::<Transactions>(transaction.hash, transaction.clone()).inspect_err(
                |err| {
                    error!(
                        target: "chainvault_storage",
                        transaction_hash = %transaction.hash,
                        %err,
                        "Failed to store transaction"
                    );
                },
            )?;
            self.tx.put::<BlockTransactions>(transaction.block_number, transaction.hash)?;
        }
        Ok(summary)
    }

    pub(crate) fn purge_block(&self, number: u64) -> Result<PurgeSummary, StorageError> {
        let block = self.get_block(number)?;

        let mut removed = 0;
        for hash in self.transaction_hashes(number)? {
            let owned = self.get_transaction(hash)?.is_some_and(|t| t.block_number == number);
            if owned {
                self.tx.delete::<Transactions>(hash, None)?;
                removed += 1;
            }
        }
        self.tx.delete::<BlockTransactions>(number, None)?;
        self.tx.delete::<Blocks>(number, None).inspect_err(|err| {
            error!(target: "chainvault_storage", block_number = number, %err, "Failed to delete block");
        })?;

        Ok(PurgeSummary { block, transactions: removed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tables;
    use reth_db::{
        DatabaseEnv,
        mdbx::{DatabaseArguments, init_db_for},
    };
    use reth_db_api::Database;
    use tempfile::TempDir;

    fn setup_db() -> (TempDir, DatabaseEnv) {
        let temp_dir = TempDir::new().expect("Could not create temp dir");
        let env = init_db_for::<_, Tables>(temp_dir.path(), DatabaseArguments::default())
            .expect("Failed to init database");
        (temp_dir, env)
    }

    fn block(number: u64, tag: u8, timestamp: u64) -> StoredBlock {
        StoredBlock {
            number,
            hash: B256::from([tag; 32]),
            parent_hash: B256::from([tag.wrapping_sub(1); 32]),
            timestamp,
            miner: Address::from([tag; 20]),
            transactions_count: 1,
            ..Default::default()
        }
    }

    fn transaction(tag: u8, block_number: u64) -> StoredTransaction {
        StoredTransaction {
            hash: B256::from([tag; 32]),
            block_number,
            from: Address::from([tag; 20]),
            to: Some(Address::from([tag.wrapping_add(100); 20])),
            value: "1".to_string(),
            timestamp: 0,
        }
    }

    #[test]
    fn test_insert_block_reports_outcome() {
        let (_dir, db) = setup_db();
        let tx = db.tx_mut().expect("Failed to create write transaction");
        let provider = BlockProvider::new(&tx);

        assert_eq!(provider.insert_block(block(1, 1, 10)).unwrap(), InsertOutcome::Inserted);
        assert_eq!(provider.insert_block(block(1, 1, 10)).unwrap(), InsertOutcome::AlreadyPresent);
        assert_eq!(
            provider.insert_block(block(1, 9, 10)).unwrap(),
            InsertOutcome::Conflict { stored_hash: B256::from([1; 32]) }
        );
        tx.commit().expect("Failed to commit");

        let tx = db.tx().expect("Failed to create read transaction");
        let provider = BlockProvider::new(&tx);
        assert_eq!(provider.get_block(1).unwrap(), Some(block(1, 1, 10)));
        assert_eq!(provider.latest_block().unwrap(), Some(block(1, 1, 10)));
    }

    #[test]
    fn test_upsert_transactions_is_idempotent_and_relocates() {
        let (_dir, db) = setup_db();
        let tx = db.tx_mut().expect("Failed to create write transaction");
        let provider = BlockProvider::new(&tx);

        let batch = vec![transaction(1, 5), transaction(2, 5)];
        let first = provider.upsert_transactions(&batch).unwrap();
        assert_eq!(first, UpsertSummary { inserted: 2, duplicates: 0, relocated: 0 });

        let second = provider.upsert_transactions(&batch).unwrap();
        assert_eq!(second, UpsertSummary { inserted: 0, duplicates: 2, relocated: 0 });
        assert_eq!(provider.block_transaction_count(5).unwrap(), 2);

        let moved = provider.upsert_transactions(&[transaction(2, 6)]).unwrap();
        assert_eq!(moved.relocated, 1);
        assert_eq!(provider.block_transaction_count(5).unwrap(), 1);
        assert_eq!(provider.block_transaction_count(6).unwrap(), 1);
        assert_eq!(provider.get_transaction(B256::from([2; 32])).unwrap().unwrap().block_number, 6);
    }

    #[test]
    fn test_purge_removes_block_and_its_transactions() {
        let (_dir, db) = setup_db();
        let tx = db.tx_mut().expect("Failed to create write transaction");
        let provider = BlockProvider::new(&tx);

        provider.insert_block(block(3, 3, 30)).unwrap();
        provider.upsert_transactions(&[transaction(7, 3), transaction(8, 3)]).unwrap();
        provider.insert_block(block(4, 4, 40)).unwrap();
        provider.upsert_transactions(&[transaction(9, 4)]).unwrap();

        let summary = provider.purge_block(3).unwrap();
        assert_eq!(summary.block, Some(block(3, 3, 30)));
        assert_eq!(summary.transactions, 2);

        assert!(provider.get_block(3).unwrap().is_none());
        assert!(provider.get_transaction(B256::from([7; 32])).unwrap().is_none());
        assert!(provider.block_transactions(3).unwrap().is_empty());
        assert_eq!(provider.block_transaction_count(4).unwrap(), 1);

        let empty = provider.purge_block(3).unwrap();
        assert_eq!(empty, PurgeSummary::default());
    }

    #[test]
    fn test_active_addresses_since_stops_at_watermark() {
        let (_dir, db) = setup_db();
        let tx = db.tx_mut().expect("Failed to create write transaction");
        let provider = BlockProvider::new(&tx);

        provider.insert_block(block(1, 1, 100)).unwrap();
        provider.upsert_transactions(&[transaction(11, 1)]).unwrap();
        provider.insert_block(block(2, 2, 200)).unwrap();
        provider.upsert_transactions(&[transaction(12, 2)]).unwrap();

        let active = provider.active_addresses_since(200).unwrap();
        assert!(active.contains(&Address::from([2; 20])));
        assert!(active.contains(&Address::from([12; 20])));
        assert!(active.contains(&Address::from([112; 20])));
        assert!(!active.contains(&Address::from([1; 20])));
        assert!(!active.contains(&Address::from([11; 20])));

        assert_eq!(provider.active_addresses_since(0).unwrap().len(), 6);
    }
}
