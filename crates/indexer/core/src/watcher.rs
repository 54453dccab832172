//! Live head tracking.

use crate::{
    BackfillScanner, BlockRef, ChainClient, ChainClientError, ConsistencyChecker, HeadStream,
    RepairReport, Retrier, RetryError, ScanEnd,
};
use alloy_primitives::B256;
use chainvault_storage::IndexStorage;
use derive_more::Display;
use futures::{StreamExt, stream::FuturesUnordered};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

/// Where new head notifications come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum HeadSource {
    /// The node's head notification capability.
    #[display("filter")]
    Filter,
    /// Periodic polling of the latest block, used when the node lacks the
    /// capability.
    #[display("polling")]
    Polling,
}

/// Follows the upstream head and feeds every new block to the consistency
/// checker with minimal latency.
///
/// Every head settles on its own timer, so a burst of heads is ingested about
/// `settle_delay` after the last one arrives.
///
/// Whenever the head subscription fails, a backfill pass over
/// `[last stored height, latest]` covers the blocks the subscription may have
/// missed before resubscribing.
#[derive(Debug)]
pub struct LiveWatcher<C, DB> {
    client: Arc<C>,
    checker: Arc<ConsistencyChecker<C, DB>>,
    backfill: Arc<BackfillScanner<C, DB>>,
    retrier: Retrier,
    settle_delay: Duration,
    poll_interval: Duration,
}

impl<C, DB> LiveWatcher<C, DB>
where
    C: ChainClient + 'static,
    DB: IndexStorage,
{
    /// Creates a watcher.
    ///
    /// `settle_delay` is waited between observing a head and fetching it;
    /// `poll_interval` paces the polling fallback and resubscription.
    pub const fn new(
        client: Arc<C>,
        checker: Arc<ConsistencyChecker<C, DB>>,
        backfill: Arc<BackfillScanner<C, DB>>,
        retrier: Retrier,
        settle_delay: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self { client, checker, backfill, retrier, settle_delay, poll_interval }
    }

    /// Follows new heads until cancelled.
    pub async fn run(&self) {
        let cancellation = self.retrier.cancellation().clone();
        let mut last_seen: Option<B256> = None;

        'subscriptions: loop {
            match self.subscribe().await {
                Ok((source, mut heads)) => {
                    info!(target: "live_watcher", %source, "Following new heads");
                    let mut settling = FuturesUnordered::new();
                    loop {
                        tokio::select! {
                            _ = cancellation.cancelled() => break 'subscriptions,
                            Some(()) = settling.next(), if !settling.is_empty() => {}
                            head = heads.next() => match head {
                                Some(Ok(hash)) if last_seen == Some(hash) => {}
                                Some(Ok(hash)) => {
                                    last_seen = Some(hash);
                                    settling.push(self.handle_head(hash));
                                }
                                Some(Err(err)) => {
                                    warn!(target: "live_watcher", %source, %err, "Head subscription failed");
                                    break;
                                }
                                None => {
                                    warn!(target: "live_watcher", %source, "Head subscription closed");
                                    break;
                                }
                            }
                        }
                    }
                    while settling.next().await.is_some() {}
                }
                Err(err) => {
                    warn!(target: "live_watcher", %err, "Failed to subscribe to new heads");
                }
            }

            self.catch_up().await;

            tokio::select! {
                _ = cancellation.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        info!(target: "live_watcher", "Live watcher stopped");
    }

    /// Opens a head stream, polling the latest block if the node has no head
    /// notification capability.
    pub(crate) async fn subscribe(&self) -> Result<(HeadSource, HeadStream), ChainClientError> {
        match self.client.new_heads().await {
            Ok(heads) => Ok((HeadSource::Filter, heads)),
            Err(ChainClientError::Unsupported(reason)) => {
                info!(target: "live_watcher", %reason, "Head notifications unsupported, polling");
                Ok((HeadSource::Polling, self.poll_heads()))
            }
            Err(err) => Err(err),
        }
    }

    fn poll_heads(&self) -> HeadStream {
        let client = self.client.clone();
        let poll_interval = self.poll_interval;

        Box::pin(async_stream::stream! {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                ticker.tick().await;
                match client.get_block(BlockRef::Latest, false).await {
                    Ok(Some(block)) => yield Ok(block.hash),
                    Ok(None) => {}
                    Err(err) if err.is_retryable() => {
                        debug!(target: "live_watcher", %err, "Failed to poll latest block");
                    }
                    Err(err) => {
                        yield Err(err);
                        break;
                    }
                }
            }
        })
    }

    async fn handle_head(&self, hash: B256) {
        tokio::select! {
            _ = self.retrier.cancellation().cancelled() => return,
            _ = tokio::time::sleep(self.settle_delay) => {}
        }

        let client = self.client.as_ref();
        let block = match self
            .retrier
            .run("get_block", move || client.get_block(BlockRef::Hash(hash), true))
            .await
        {
            Ok(Some(block)) => block,
            Ok(None) => {
                debug!(target: "live_watcher", block_hash = %hash, "Head no longer available");
                return;
            }
            Err(err) => {
                if err != RetryError::Cancelled {
                    warn!(target: "live_watcher", block_hash = %hash, %err, "Failed to fetch head");
                }
                return;
            }
        };

        match self.checker.verify_block(&block).await {
            Ok(RepairReport::Consistent) => {
                debug!(target: "live_watcher", block_number = block.number, "Head stored")
            }
            Ok(report) => {
                info!(target: "live_watcher", block_number = block.number, ?report, "Head stored after repair")
            }
            Err(err) if err.is_cancelled() => {}
            Err(err) => {
                error!(target: "live_watcher", block_number = block.number, %err, "Failed to ingest head")
            }
        }
    }

    async fn catch_up(&self) {
        let last_known = match self.checker.writer().db().latest_block() {
            Ok(block) => block.map_or(self.backfill.start(), |b| b.number),
            Err(err) => {
                error!(target: "live_watcher", %err, "Failed to read latest stored block");
                return;
            }
        };

        info!(target: "live_watcher", from = last_known, "Catching up through backfill");
        match self.backfill.scan_range(last_known, ScanEnd::Latest).await {
            Ok(summary) => debug!(target: "live_watcher", ?summary, "Catch-up complete"),
            Err(err) if err.is_cancelled() => {}
            Err(err) => warn!(target: "live_watcher", %err, "Catch-up failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BlockWriter, client::MockChainClient, test_utils::TestChain};
    use chainvault_storage::{BlockStorageReader, MemoryDb};
    use tokio_util::sync::CancellationToken;

    fn watcher<C: ChainClient + 'static>(
        client: Arc<C>,
        db: &Arc<MemoryDb>,
        cancellation: CancellationToken,
    ) -> LiveWatcher<C, MemoryDb> {
        let writer = Arc::new(BlockWriter::new(db.clone(), 1000, 18));
        let retrier = Retrier::new(Duration::from_secs(1), Duration::from_secs(2), cancellation);
        let checker = Arc::new(ConsistencyChecker::new(
            client.clone(),
            writer,
            retrier.clone(),
            64,
            256,
        ));
        let backfill = Arc::new(BackfillScanner::new(
            client.clone(),
            checker.clone(),
            retrier.clone(),
            0,
            Duration::from_secs(15),
        ));
        LiveWatcher::new(
            client,
            checker,
            backfill,
            retrier,
            Duration::from_secs(5),
            Duration::from_secs(2),
        )
    }

    fn assert_matches_chain(db: &MemoryDb, chain: &TestChain) {
        for number in 0..=chain.tip() {
            let stored = db.get_block(number).unwrap().expect("block stored");
            assert_eq!(stored.hash, chain.block_at(number).unwrap().hash, "mismatch at {number}");
        }
    }

    #[tokio::test]
    async fn test_unsupported_filters_fall_back_to_polling() {
        let mut client = MockChainClient::new();
        client
            .expect_new_heads()
            .times(1)
            .returning(|| Err(ChainClientError::Unsupported("eth_newBlockFilter".into())));
        let db = Arc::new(MemoryDb::default());
        let watcher = watcher(Arc::new(client), &db, CancellationToken::new());

        let (source, _heads) = watcher.subscribe().await.expect("polling fallback");
        assert_eq!(source, HeadSource::Polling);
    }

    #[tokio::test]
    async fn test_transient_subscription_failure_is_reported() {
        let mut client = MockChainClient::new();
        client
            .expect_new_heads()
            .times(1)
            .returning(|| Err(ChainClientError::Transient("timeout".into())));
        let db = Arc::new(MemoryDb::default());
        let watcher = watcher(Arc::new(client), &db, CancellationToken::new());

        let result = watcher.subscribe().await;
        assert!(matches!(result, Err(ChainClientError::Transient(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_follows_filter_heads() {
        let chain = Arc::new(TestChain::new(6, 2));
        let db = Arc::new(MemoryDb::default());
        let cancellation = CancellationToken::new();
        let watcher = Arc::new(watcher(chain.clone(), &db, cancellation.clone()));

        let handle = tokio::spawn({
            let watcher = watcher.clone();
            async move { watcher.run().await }
        });
        tokio::time::sleep(Duration::from_secs(30)).await;
        cancellation.cancel();
        handle.await.expect("watcher panicked");

        assert_matches_chain(&db, &chain);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_heads_settles_concurrently() {
        let chain = Arc::new(TestChain::new(10, 1));
        chain.announce_every_block();
        let db = Arc::new(MemoryDb::default());
        let cancellation = CancellationToken::new();
        let watcher = Arc::new(watcher(chain.clone(), &db, cancellation.clone()));

        let handle = tokio::spawn({
            let watcher = watcher.clone();
            async move { watcher.run().await }
        });

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(db.latest_block().unwrap().is_none());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_matches_chain(&db, &chain);

        cancellation.cancel();
        handle.await.expect("watcher panicked");
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_follows_growth_and_reorgs() {
        let chain = Arc::new(TestChain::new(6, 1));
        chain.disable_head_filters();
        let db = Arc::new(MemoryDb::default());
        let cancellation = CancellationToken::new();
        let watcher = Arc::new(watcher(chain.clone(), &db, cancellation.clone()));

        let handle = tokio::spawn({
            let watcher = watcher.clone();
            async move { watcher.run().await }
        });

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_matches_chain(&db, &chain);

        chain.extend(2);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_matches_chain(&db, &chain);

        chain.reorg_from(4, 1);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_matches_chain(&db, &chain);

        cancellation.cancel();
        handle.await.expect("watcher panicked");
    }
}
