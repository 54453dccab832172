//! Provider for progress checkpoints.

use crate::{Checkpoint, CheckpointKey, StorageError, models::Checkpoints};
use reth_db_api::transaction::{DbTx, DbTxMut};
use tracing::error;

/// Checkpoint storage over a borrowed database transaction.
pub(crate) struct CheckpointProvider<'tx, TX> {
    tx: &'tx TX,
}

impl<'tx, TX> CheckpointProvider<'tx, TX> {
    pub(crate) const fn new(tx: &'tx TX) -> Self {
        Self { tx }
    }
}

impl<TX> CheckpointProvider<'_, TX>
where
    TX: DbTx,
{
    pub(crate) fn get_checkpoint(&self, key: CheckpointKey) -> Result<Option<u64>, StorageError> {
        let checkpoint = self.tx.get::<Checkpoints>(key.into()).inspect_err(|err| {
            error!(target: "chainvault_storage", ?key, %err, "Failed to read checkpoint");
        })?;
        Ok(checkpoint.map(|c| c.value))
    }
}

impl<TX> CheckpointProvider<'_, TX>
where
    TX: DbTxMut,
{
    pub(crate) fn set_checkpoint(&self, key: CheckpointKey, value: u64) -> Result<(), StorageError> {
        self.tx.put::<Checkpoints>(key.into(), Checkpoint { value }).inspect_err(|err| {
            error!(target: "chainvault_storage", ?key, %err, "Failed to store checkpoint");
        })?;
        Ok(())
    }
}
