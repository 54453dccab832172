//! Error types of the ingestion engine.

use crate::ConfigError;
use alloy_transport::{RpcError, TransportError, TransportErrorKind};
use chainvault_storage::StorageError;
use thiserror::Error;

/// JSON-RPC code returned for methods the node does not implement.
const METHOD_NOT_FOUND: i64 = -32601;

/// Failure of a call to the upstream node.
///
/// "Not found" is not an error: lookups return `Ok(None)` for references
/// that do not (yet) exist.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainClientError {
    /// The connection to the node is gone.
    #[error("node disconnected: {0}")]
    Disconnected(String),
    /// A network or server failure that may succeed on retry.
    #[error("transient rpc error: {0}")]
    Transient(String),
    /// The node does not support the requested capability.
    #[error("unsupported by node: {0}")]
    Unsupported(String),
    /// The node returned a payload that cannot be decoded or lacks identity fields.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ChainClientError {
    /// Returns `true` if the call should be retried with backoff.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Disconnected(_) | Self::Transient(_))
    }
}

impl From<TransportError> for ChainClientError {
    fn from(err: TransportError) -> Self {
        let message = err.to_string();
        match err {
            RpcError::Transport(TransportErrorKind::BackendGone) => Self::Disconnected(message),
            RpcError::Transport(TransportErrorKind::PubsubUnavailable) |
            RpcError::UnsupportedFeature(_) => Self::Unsupported(message),
            RpcError::ErrorResp(payload) if payload.code == METHOD_NOT_FOUND => {
                Self::Unsupported(message)
            }
            RpcError::DeserError { .. } | RpcError::NullResp => Self::Malformed(message),
            _ => Self::Transient(message),
        }
    }
}

/// Error raised while persisting a block.
#[derive(Debug, Error)]
pub enum WriterError {
    /// The datastore rejected an operation.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The block was fetched without its transaction bodies.
    #[error("block {number} carries {found} of {expected} transactions")]
    IncompleteBlock {
        /// Block height.
        number: u64,
        /// Transactions announced by the block.
        expected: u64,
        /// Transaction bodies present.
        found: u64,
    },
    /// Some transaction batches failed; the block record was not written.
    #[error("{failed} of {total} transaction batches failed for block {number}")]
    FailedBatches {
        /// Block height.
        number: u64,
        /// Failed batches.
        failed: usize,
        /// Total batches.
        total: usize,
    },
}

/// Outcome of a retried operation that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError {
    /// Shutdown was requested while retrying.
    #[error("cancelled")]
    Cancelled,
    /// The operation failed with an error that retrying cannot fix.
    #[error(transparent)]
    Fatal(ChainClientError),
}

/// Top level error of the ingestion tasks.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Datastore failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Writer failure.
    #[error(transparent)]
    Writer(#[from] WriterError),
    /// Upstream failure after retries.
    #[error(transparent)]
    Retry(#[from] RetryError),
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl IndexerError {
    /// Returns `true` if the error only reports that shutdown was requested.
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Retry(RetryError::Cancelled))
    }
}
