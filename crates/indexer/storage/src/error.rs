use reth_db::DatabaseError;
use thiserror::Error;

/// Errors that may occur while interacting with the indexer datastore.
///
/// This enum is used across all implementations of the storage traits.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Error returned by the underlying database.
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// The database environment could not be created or opened.
    #[error("failed to initialise database: {0}")]
    DatabaseInit(String),

    /// A shared lock guarding in-memory state was poisoned by a panicking writer.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// The write was rejected by the backend.
    #[error("write rejected: {0}")]
    WriteRejected(String),
}
