//! Main database access structure and transaction contexts.

use crate::{
    AddressRecord, CheckpointKey, InsertOutcome, PurgeSummary, StorageError, StoredBlock,
    StoredTransaction, UpsertSummary,
    models::Tables,
    providers::{AddressProvider, BlockProvider, CheckpointProvider},
    traits::{AddressStorage, BlockStorageReader, BlockStorageWriter, CheckpointStorage},
};
use alloy_primitives::{Address, B256};
use reth_db::{
    DatabaseEnv,
    mdbx::{DatabaseArguments, init_db_for},
};
use reth_db_api::{database::Database, transaction::DbTx};
use std::{collections::BTreeSet, path::Path};

type WriteTx = <DatabaseEnv as Database>::TXMut;

/// Manages the MDBX environment holding every indexer table.
/// Provides transactional access to data via providers.
#[derive(Debug)]
pub struct ChainDb {
    env: DatabaseEnv,
}

impl ChainDb {
    /// Creates or opens a database environment at the given path.
    pub fn new(path: &Path) -> Result<Self, StorageError> {
        let env = init_db_for::<_, Tables>(path, DatabaseArguments::default())
            .map_err(|err| StorageError::DatabaseInit(err.to_string()))?;
        Ok(Self { env })
    }

    /// Runs `f` in a write transaction that is committed only if `f` succeeds.
    fn write<T>(
        &self,
        f: impl FnOnce(&WriteTx) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let tx = self.env.tx_mut()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                tx.abort();
                Err(err)
            }
        }
    }
}

impl BlockStorageReader for ChainDb {
    fn get_block(&self, number: u64) -> Result<Option<StoredBlock>, StorageError> {
        self.env.view(|tx| BlockProvider::new(tx).get_block(number))?
    }

    fn latest_block(&self) -> Result<Option<StoredBlock>, StorageError> {
        self.env.view(|tx| BlockProvider::new(tx).latest_block())?
    }

    fn get_transaction(&self, hash: B256) -> Result<Option<StoredTransaction>, StorageError> {
        self.env.view(|tx| BlockProvider::new(tx).get_transaction(hash))?
    }

    fn block_transactions(&self, number: u64) -> Result<Vec<StoredTransaction>, StorageError> {
        self.env.view(|tx| BlockProvider::new(tx).block_transactions(number))?
    }

    fn block_transaction_count(&self, number: u64) -> Result<u64, StorageError> {
        self.env.view(|tx| BlockProvider::new(tx).block_transaction_count(number))?
    }
}

impl BlockStorageWriter for ChainDb {
    fn insert_block(&self, block: StoredBlock) -> Result<InsertOutcome, StorageError> {
        self.write(|tx| BlockProvider::new(tx).insert_block(block))
    }

    fn upsert_transactions(
        &self,
        transactions: &[StoredTransaction],
    ) -> Result<UpsertSummary, StorageError> {
        self.write(|tx| BlockProvider::new(tx).upsert_transactions(transactions))
    }

    fn purge_block(&self, number: u64) -> Result<PurgeSummary, StorageError> {
        self.write(|tx| BlockProvider::new(tx).purge_block(number))
    }
}

impl AddressStorage for ChainDb {
    fn active_addresses_since(&self, since: u64) -> Result<BTreeSet<Address>, StorageError> {
        self.env.view(|tx| BlockProvider::new(tx).active_addresses_since(since))?
    }

    fn upsert_address(&self, record: AddressRecord) -> Result<(), StorageError> {
        self.write(|tx| AddressProvider::new(tx).upsert_address(record))
    }

    fn get_address(&self, address: Address) -> Result<Option<AddressRecord>, StorageError> {
        self.env.view(|tx| AddressProvider::new(tx).get_address(address))?
    }
}

impl CheckpointStorage for ChainDb {
    fn get_checkpoint(&self, key: CheckpointKey) -> Result<Option<u64>, StorageError> {
        self.env.view(|tx| CheckpointProvider::new(tx).get_checkpoint(key))?
    }

    fn set_checkpoint(&self, key: CheckpointKey, value: u64) -> Result<(), StorageError> {
        self.write(|tx| CheckpointProvider::new(tx).set_checkpoint(key, value))
    }
}
