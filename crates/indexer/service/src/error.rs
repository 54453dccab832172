use chainvault_core::{ConfigError, RetryError};
use thiserror::Error;
use tokio::task::JoinError;

/// Errors that stop the indexer service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Waiting for the upstream node failed.
    #[error("upstream node unreachable: {0}")]
    Unreachable(#[from] RetryError),
    /// A task panicked.
    #[error("task {name} failed: {source}")]
    Task {
        /// Name of the task.
        name: &'static str,
        /// Join failure.
        source: JoinError,
    },
}
