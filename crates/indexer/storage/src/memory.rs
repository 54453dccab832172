//! In-memory datastore used by tests across the workspace.

use crate::{
    AddressRecord, CheckpointKey, InsertOutcome, PurgeSummary, StorageError, StoredBlock,
    StoredTransaction, UpsertSummary,
    traits::{AddressStorage, BlockStorageReader, BlockStorageWriter, CheckpointStorage},
};
use alloy_primitives::{Address, B256};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{
        RwLock, RwLockReadGuard, RwLockWriteGuard,
        atomic::{AtomicUsize, Ordering},
    },
};

#[derive(Debug, Default)]
struct State {
    blocks: BTreeMap<u64, StoredBlock>,
    transactions: HashMap<B256, StoredTransaction>,
    block_transactions: BTreeMap<u64, BTreeSet<B256>>,
    addresses: HashMap<Address, AddressRecord>,
    checkpoints: HashMap<CheckpointKey, u64>,
}

impl State {
    fn block_transactions(&self, number: u64) -> Vec<StoredTransaction> {
        self.block_transactions
            .get(&number)
            .into_iter()
            .flatten()
            .filter_map(|hash| self.transactions.get(hash).cloned())
            .collect()
    }
}

/// A [`crate::IndexStorage`] backed by ordinary collections.
///
/// Semantics match [`crate::ChainDb`]: a batch upsert and a purge are each
/// applied atomically under one lock.
#[derive(Debug, Default)]
pub struct MemoryDb {
    state: RwLock<State>,
    failing_transaction_writes: AtomicUsize,
    failing_address_writes: AtomicUsize,
}

/// Consumes one injected failure from `counter`, if any is left.
fn take_failure(counter: &AtomicUsize) -> bool {
    counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1)).is_ok()
}

impl MemoryDb {
    /// Makes the next `count` calls to
    /// [`BlockStorageWriter::upsert_transactions`] fail without writing.
    pub fn fail_transaction_writes(&self, count: usize) {
        self.failing_transaction_writes.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` calls to [`AddressStorage::upsert_address`]
    /// fail without writing.
    pub fn fail_address_writes(&self, count: usize) {
        self.failing_address_writes.store(count, Ordering::SeqCst);
    }

    /// Removes a block record while leaving its transactions in place.
    ///
    /// Produces the partial state a crash between the two write steps leaves.
    pub fn remove_block_record(&self, number: u64) -> Result<Option<StoredBlock>, StorageError> {
        Ok(self.write()?.blocks.remove(&number))
    }

    /// Removes the transactions of a block while leaving the block record in place.
    pub fn remove_block_transactions(&self, number: u64) -> Result<usize, StorageError> {
        let mut state = self.write()?;
        let hashes = state.block_transactions.remove(&number).unwrap_or_default();
        for hash in &hashes {
            state.transactions.remove(hash);
        }
        Ok(hashes.len())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StorageError> {
        self.state.read().map_err(|_| StorageError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StorageError> {
        self.state.write().map_err(|_| StorageError::LockPoisoned)
    }
}

impl BlockStorageReader for MemoryDb {
    fn get_block(&self, number: u64) -> Result<Option<StoredBlock>, StorageError> {
        Ok(self.read()?.blocks.get(&number).cloned())
    }

    fn latest_block(&self) -> Result<Option<StoredBlock>, StorageError> {
        Ok(self.read()?.blocks.values().next_back().cloned())
    }

    fn get_transaction(&self, hash: B256) -> Result<Option<StoredTransaction>, StorageError> {
        Ok(self.read()?.transactions.get(&hash).cloned())
    }

    fn block_transactions(&self, number: u64) -> Result<Vec<StoredTransaction>, StorageError> {
        Ok(self.read()?.block_transactions(number))
    }

    fn block_transaction_count(&self, number: u64) -> Result<u64, StorageError> {
        Ok(self.read()?.block_transactions(number).len() as u64)
    }
}

impl BlockStorageWriter for MemoryDb {
    fn insert_block(&self, block: StoredBlock) -> Result<InsertOutcome, StorageError> {
        let mut state = self.write()?;
        if let Some(stored) = state.blocks.get(&block.number) {
            return Ok(if stored.hash == block.hash {
                InsertOutcome::AlreadyPresent
            } else {
                InsertOutcome::Conflict { stored_hash: stored.hash }
            });
        }
        state.blocks.insert(block.number, block);
        Ok(InsertOutcome::Inserted)
    }

    fn upsert_transactions(
        &self,
        transactions: &[StoredTransaction],
    ) -> Result<UpsertSummary, StorageError> {
        if take_failure(&self.failing_transaction_writes) {
            return Err(StorageError::WriteRejected("injected transaction write failure".into()));
        }

        let mut state = self.write()?;
        let mut summary = UpsertSummary::default();
        for transaction in transactions {
            match state.transactions.get(&transaction.hash).map(|t| t.block_number) {
                Some(number) if number == transaction.block_number => {
                    summary.duplicates += 1;
                    continue;
                }
                Some(number) => {
                    if let Some(index) = state.block_transactions.get_mut(&number) {
                        index.remove(&transaction.hash);
                    }
                    summary.relocated += 1;
                }
                None => summary.inserted += 1,
            }
            state.transactions.insert(transaction.hash, transaction.clone());
            state
                .block_transactions
                .entry(transaction.block_number)
                .or_default()
                .insert(transaction.hash);
        }
        Ok(summary)
    }

    fn purge_block(&self, number: u64) -> Result<PurgeSummary, StorageError> {
        let mut state = self.write()?;
        let block = state.blocks.remove(&number);
        let hashes = state.block_transactions.remove(&number).unwrap_or_default();

        let mut removed = 0;
        for hash in hashes {
            if state.transactions.get(&hash).is_some_and(|t| t.block_number == number) {
                state.transactions.remove(&hash);
                removed += 1;
            }
        }
        Ok(PurgeSummary { block, transactions: removed })
    }
}

impl AddressStorage for MemoryDb {
    fn active_addresses_since(&self, since: u64) -> Result<BTreeSet<Address>, StorageError> {
        let state = self.read()?;
        let mut addresses = BTreeSet::new();
        for (number, block) in state.blocks.iter().rev() {
            if block.timestamp < since {
                break;
            }
            addresses.insert(block.miner);
            for transaction in state.block_transactions(*number) {
                addresses.insert(transaction.from);
                addresses.extend(transaction.to);
            }
        }
        Ok(addresses)
    }

    fn upsert_address(&self, record: AddressRecord) -> Result<(), StorageError> {
        if take_failure(&self.failing_address_writes) {
            return Err(StorageError::WriteRejected("injected address write failure".into()));
        }
        self.write()?.addresses.insert(record.address, record);
        Ok(())
    }

    fn get_address(&self, address: Address) -> Result<Option<AddressRecord>, StorageError> {
        Ok(self.read()?.addresses.get(&address).cloned())
    }
}

impl CheckpointStorage for MemoryDb {
    fn get_checkpoint(&self, key: CheckpointKey) -> Result<Option<u64>, StorageError> {
        Ok(self.read()?.checkpoints.get(&key).copied())
    }

    fn set_checkpoint(&self, key: CheckpointKey, value: u64) -> Result<(), StorageError> {
        self.write()?.checkpoints.insert(key, value);
        Ok(())
    }
}
