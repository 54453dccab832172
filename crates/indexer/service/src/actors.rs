//! [IndexerActor] implementations for the ingestion tasks.

use crate::ServiceError;
use async_trait::async_trait;
use chainvault_core::{BackfillScanner, BalanceSweeper, ChainClient, LiveWatcher};
use chainvault_storage::IndexStorage;
use std::sync::Arc;
use tracing::info;

/// A long-running task of the indexer.
///
/// Actors run until the cancellation token they were built with fires, and
/// never share in-memory state with one another.
#[async_trait]
pub trait IndexerActor {
    /// The error type for the actor.
    type Error: std::fmt::Debug;

    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Runs the actor to completion.
    async fn start(self) -> Result<(), Self::Error>;
}

#[async_trait]
impl<C, DB> IndexerActor for LiveWatcher<C, DB>
where
    C: ChainClient + 'static,
    DB: IndexStorage,
{
    type Error = ServiceError;

    fn name(&self) -> &'static str {
        "live_watcher"
    }

    async fn start(self) -> Result<(), Self::Error> {
        info!(target: "service", actor = self.name(), "Starting actor");
        self.run().await;
        Ok(())
    }
}

#[async_trait]
impl<C, DB> IndexerActor for Arc<BackfillScanner<C, DB>>
where
    C: ChainClient + 'static,
    DB: IndexStorage,
{
    type Error = ServiceError;

    fn name(&self) -> &'static str {
        "backfill"
    }

    async fn start(self) -> Result<(), Self::Error> {
        info!(target: "service", actor = self.name(), "Starting actor");
        self.run().await;
        Ok(())
    }
}

#[async_trait]
impl<C, DB> IndexerActor for BalanceSweeper<C, DB>
where
    C: ChainClient + 'static,
    DB: IndexStorage,
{
    type Error = ServiceError;

    fn name(&self) -> &'static str {
        "balance_sweeper"
    }

    async fn start(self) -> Result<(), Self::Error> {
        info!(target: "service", actor = self.name(), "Starting actor");
        self.run().await;
        Ok(())
    }
}
