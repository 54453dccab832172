//! Provider for account balance snapshots.

use crate::{AddressRecord, StorageError, models::Addresses};
use alloy_primitives::Address;
use reth_db_api::transaction::{DbTx, DbTxMut};
use tracing::error;

/// Address storage over a borrowed database transaction.
pub(crate) struct AddressProvider<'tx, TX> {
    tx: &'tx TX,
}

impl<'tx, TX> AddressProvider<'tx, TX> {
    pub(crate) const fn new(tx: &'tx TX) -> Self {
        Self { tx }
    }
}

impl<TX> AddressProvider<'_, TX>
where
    TX: DbTx,
{
    pub(crate) fn get_address(
        &self,
        address: Address,
    ) -> Result<Option<AddressRecord>, StorageError> {
        let record = self.tx.get::<Addresses>(address).inspect_err(|err| {
            error!(target: "chainvault_storage", %address, %err, "Failed to read address");
        })?;
        Ok(record)
    }
}

impl<TX> AddressProvider<'_, TX>
where
    TX: DbTxMut,
{
    pub(crate) fn upsert_address(&self, record: AddressRecord) -> Result<(), StorageError> {
        let address = record.address;
        self.tx.put::<Addresses>(address, record).inspect_err(|err| {
            error!(target: "chainvault_storage", %address, %err, "Failed to store address");
        })?;
        Ok(())
    }
}
