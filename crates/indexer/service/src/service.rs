//! The indexer service.

use crate::{IndexerActor, ServiceError};
use chainvault_core::{
    BackfillScanner, BalanceSweeper, BlockWriter, ChainClient, ConsistencyChecker, IndexerConfig,
    LiveWatcher, Metrics, Retrier, RetryError,
};
use chainvault_storage::IndexStorage;
use std::{collections::HashMap, sync::Arc};
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Runs the ingestion tasks against one upstream node and one datastore.
///
/// The datastore is the only state shared between tasks. On cancellation no
/// new fetches or scans are scheduled; writes already in progress complete.
#[derive(Debug)]
pub struct IndexerService<C, DB> {
    config: IndexerConfig,
    client: Arc<C>,
    db: Arc<DB>,
    cancellation: CancellationToken,
}

impl<C, DB> IndexerService<C, DB>
where
    C: ChainClient + 'static,
    DB: IndexStorage,
{
    /// Creates a service after validating `config`.
    pub fn new(
        config: IndexerConfig,
        client: Arc<C>,
        db: Arc<DB>,
        cancellation: CancellationToken,
    ) -> Result<Self, ServiceError> {
        config.validate()?;
        Ok(Self { config, client, db, cancellation })
    }

    /// Each task gets its own retrier so a failing call never blocks a sibling.
    fn retrier(&self) -> Retrier {
        Retrier::new(
            self.config.retry_min_delay,
            self.config.retry_max_delay,
            self.cancellation.clone(),
        )
    }

    /// Waits for the upstream node, then runs every task until cancelled.
    ///
    /// Cancellation while still waiting for the node is a clean shutdown.
    pub async fn start(self) -> Result<(), ServiceError> {
        Metrics::init();

        info!(target: "service", rpc_url = %self.config.rpc_url, "Waiting for upstream node");
        match self.retrier().wait_for_connection(self.client.as_ref()).await {
            Ok(()) => {}
            Err(RetryError::Cancelled) => {
                info!(target: "service", "Shutdown requested before the upstream node was reachable");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        let writer = Arc::new(BlockWriter::new(
            self.db.clone(),
            self.config.batch_size,
            self.config.decimals,
        ));
        let checker = Arc::new(ConsistencyChecker::new(
            self.client.clone(),
            writer,
            self.retrier(),
            self.config.max_reorg_depth,
            self.config.max_gap_fill,
        ));
        let backfill = Arc::new(BackfillScanner::new(
            self.client.clone(),
            checker.clone(),
            self.retrier(),
            self.config.backfill_start,
            self.config.backfill_pass_delay,
        ));
        let watcher = LiveWatcher::new(
            self.client.clone(),
            checker,
            backfill.clone(),
            self.retrier(),
            self.config.settle_delay,
            self.config.head_poll_interval,
        );
        let sweeper = BalanceSweeper::new(
            self.client.clone(),
            self.db.clone(),
            self.retrier(),
            self.config.sweep_interval,
            self.config.sweep_concurrency,
            self.config.decimals,
        );

        let mut actors = Actors::default();
        actors.spawn(watcher);
        actors.spawn(backfill);
        actors.spawn(sweeper);
        info!(target: "service", "Indexer started");

        let result = actors.join_all(&self.cancellation).await;
        info!(target: "service", "Indexer stopped");
        result
    }
}

/// Running actors, keyed by task id so a panicking actor can still be named.
#[derive(Debug, Default)]
struct Actors {
    tasks: JoinSet<Result<(), ServiceError>>,
    names: HashMap<Id, &'static str>,
}

impl Actors {
    fn spawn<A>(&mut self, actor: A)
    where
        A: IndexerActor<Error = ServiceError> + Send + 'static,
    {
        let name = actor.name();
        let handle = self.tasks.spawn(async move { actor.start().await });
        self.names.insert(handle.id(), name);
    }

    fn name(&self, id: Id) -> &'static str {
        self.names.get(&id).copied().unwrap_or("unknown")
    }

    /// Waits for every actor. The first failure cancels the others and is
    /// returned once they have stopped.
    async fn join_all(mut self, cancellation: &CancellationToken) -> Result<(), ServiceError> {
        let mut result = Ok(());
        while let Some(joined) = self.tasks.join_next_with_id().await {
            match joined {
                Ok((id, Ok(()))) => info!(target: "service", actor = self.name(id), "Actor stopped"),
                Ok((id, Err(err))) => {
                    error!(target: "service", actor = self.name(id), %err, "Actor failed");
                    cancellation.cancel();
                    result = Err(err);
                }
                Err(err) => {
                    let name = self.name(err.id());
                    error!(target: "service", actor = name, %err, "Actor panicked");
                    cancellation.cancel();
                    result = Err(ServiceError::Task { name, source: err });
                }
            }
        }
        result
    }
}
