#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod error;
pub use error::StorageError;

mod models;
pub use models::{
    AddressRecord, Addresses, BlockTransactions, Blocks, Checkpoint, CheckpointKey, Checkpoints,
    StoredBlock, StoredTransaction, Transactions,
};

mod traits;
pub use traits::{
    AddressStorage, BlockStorageReader, BlockStorageWriter, CheckpointStorage, IndexStorage,
    InsertOutcome, PurgeSummary, UpsertSummary,
};

mod providers;

mod chaindb;
pub use chaindb::ChainDb;

#[cfg(any(test, feature = "test-utils"))]
mod memory;
#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryDb;
