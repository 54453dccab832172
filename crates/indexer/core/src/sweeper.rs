//! Periodic balance resynchronization.

use crate::{ChainClient, IndexerError, Metrics, Retrier, RetryError, to_decimal_string};
use alloy_primitives::Address;
use chainvault_storage::{AddressRecord, CheckpointKey, IndexStorage};
use futures::{StreamExt, stream};
use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::{debug, error, info, warn};

/// Counters of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Lower timestamp bound of the activity window.
    pub watermark: u64,
    /// Wall-clock start of the sweep, the next watermark.
    pub started_at: u64,
    /// Distinct addresses active in the window.
    pub candidates: usize,
    /// Address records written.
    pub updated: usize,
    /// Addresses the node refused to serve a balance for.
    pub skipped: usize,
    /// Addresses whose record could not be written.
    pub failed: usize,
}

/// Refreshes the balances of addresses touched since the previous sweep.
///
/// The watermark is the wall-clock start of the last sweep that wrote every
/// record it could fetch and is persisted, so overlapping or slow sweeps never leave a gap in the
/// covered window. Addresses may be refreshed more than once; record upserts
/// are idempotent.
#[derive(Debug)]
pub struct BalanceSweeper<C, DB> {
    client: Arc<C>,
    db: Arc<DB>,
    retrier: Retrier,
    interval: Duration,
    concurrency: usize,
    decimals: u8,
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default()
}

impl<C, DB> BalanceSweeper<C, DB>
where
    C: ChainClient,
    DB: IndexStorage,
{
    /// Creates a sweeper running every `interval` with at most `concurrency`
    /// refreshes in flight.
    pub const fn new(
        client: Arc<C>,
        db: Arc<DB>,
        retrier: Retrier,
        interval: Duration,
        concurrency: usize,
        decimals: u8,
    ) -> Self {
        Self { client, db, retrier, interval, concurrency, decimals }
    }

    /// Sweeps on every interval tick until cancelled.
    pub async fn run(&self) {
        info!(target: "balance_sweeper", interval = ?self.interval, "Starting balance sweeper");
        let cancellation = self.retrier.cancellation().clone();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                _ = ticker.tick() => match self.sweep_once().await {
                    Ok(summary) => info!(
                        target: "balance_sweeper",
                        watermark = summary.watermark,
                        candidates = summary.candidates,
                        updated = summary.updated,
                        skipped = summary.skipped,
                        failed = summary.failed,
                        "Balance sweep complete"
                    ),
                    Err(err) if err.is_cancelled() => break,
                    Err(err) => error!(target: "balance_sweeper", %err, "Balance sweep failed"),
                }
            }
        }
        info!(target: "balance_sweeper", "Balance sweeper stopped");
    }

    /// Runs a single sweep.
    ///
    /// Addresses the node refuses to serve are skipped. The watermark advances
    /// unless a record could not be written, so storage failures are retried
    /// by the next sweep.
    pub async fn sweep_once(&self) -> Result<SweepSummary, IndexerError> {
        let started_at = unix_now();
        let watermark = self.db.get_checkpoint(CheckpointKey::SweepWatermark)?.unwrap_or(0);
        let candidates = self.db.active_addresses_since(watermark)?;
        debug!(
            target: "balance_sweeper",
            watermark,
            candidates = candidates.len(),
            "Sweeping active addresses"
        );

        let mut summary =
            SweepSummary { watermark, started_at, candidates: candidates.len(), ..Default::default() };
        let results: Vec<_> = stream::iter(candidates)
            .map(|address| async move { (address, self.refresh(address, started_at).await) })
            .buffer_unordered(self.concurrency.max(1))
            .collect()
            .await;

        for (address, result) in results {
            match result {
                Ok(()) => summary.updated += 1,
                Err(err) if err.is_cancelled() => return Err(err),
                Err(IndexerError::Retry(RetryError::Fatal(err))) => {
                    warn!(target: "balance_sweeper", %address, %err, "Skipping address");
                    summary.skipped += 1;
                }
                Err(_) => summary.failed += 1,
            }
        }
        Metrics::record_addresses_swept(summary.updated);

        if self.retrier.cancellation().is_cancelled() {
            return Err(RetryError::Cancelled.into());
        }
        if summary.failed == 0 {
            self.db.set_checkpoint(CheckpointKey::SweepWatermark, started_at)?;
        } else {
            warn!(
                target: "balance_sweeper",
                failed = summary.failed,
                watermark,
                "Keeping watermark, failed addresses are retried next sweep"
            );
        }
        Ok(summary)
    }

    /// Refreshes one address. The balance is required; a nonce the node does
    /// not serve keeps the stored value.
    async fn refresh(&self, address: Address, started_at: u64) -> Result<(), IndexerError> {
        let client = self.client.as_ref();
        let balance = self.retrier.run("get_balance", move || client.get_balance(address)).await?;
        let nonce = match self
            .retrier
            .run("get_transaction_count", move || client.get_transaction_count(address))
            .await
        {
            Ok(nonce) => nonce,
            Err(RetryError::Cancelled) => return Err(RetryError::Cancelled.into()),
            Err(RetryError::Fatal(err)) => {
                debug!(target: "balance_sweeper", %address, %err, "Transaction count unavailable");
                self.db.get_address(address)?.map(|record| record.nonce).unwrap_or_default()
            }
        };

        let balance = to_decimal_string(balance, self.decimals);
        let balance_decimal = balance.parse().unwrap_or_default();
        self.db
            .upsert_address(AddressRecord {
                address,
                balance,
                balance_decimal,
                nonce,
                last_updated: started_at,
            })
            .inspect_err(|err| {
                warn!(target: "balance_sweeper", %address, %err, "Failed to store address");
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BlockWriter, ChainClientError, client::MockChainClient, test_utils::TestChain};
    use alloy_primitives::U256;
    use chainvault_storage::{AddressStorage, CheckpointStorage, MemoryDb};
    use tokio_util::sync::CancellationToken;

    fn sweeper<C: ChainClient>(
        client: Arc<C>,
        db: &Arc<MemoryDb>,
    ) -> BalanceSweeper<C, MemoryDb> {
        let retrier = Retrier::new(Duration::ZERO, Duration::ZERO, CancellationToken::new());
        BalanceSweeper::new(client, db.clone(), retrier, Duration::from_secs(300), 4, 18)
    }

    fn seed(chain: &TestChain, db: &Arc<MemoryDb>) {
        let writer = BlockWriter::new(db.clone(), 1000, 18);
        for number in 0..=chain.tip() {
            writer.store(&chain.block_at(number).unwrap()).unwrap();
        }
    }

    #[tokio::test]
    async fn test_sweep_covers_recent_activity() {
        let chain = Arc::new(TestChain::new(10, 2));
        let db = Arc::new(MemoryDb::default());
        seed(&chain, &db);

        let watermark = TestChain::timestamp(7);
        db.set_checkpoint(CheckpointKey::SweepWatermark, watermark).unwrap();
        let rich = TestChain::sender(9, 0);
        chain.set_account(rich, U256::from(25u64) * U256::from(10u64).pow(U256::from(17u64)), 3);

        let summary = sweeper(chain.clone(), &db).sweep_once().await.unwrap();
        // Per block: miner, two senders and one recipient.
        assert_eq!(summary.candidates, 4 * 4);
        assert_eq!(summary.updated, 16);

        for number in 7..=10 {
            for address in [
                TestChain::miner(number),
                TestChain::sender(number, 0),
                TestChain::sender(number, 1),
                TestChain::recipient(number, 0),
            ] {
                let record = db.get_address(address).unwrap().expect("address swept");
                assert!(record.last_updated >= watermark);
            }
        }
        assert!(db.get_address(TestChain::miner(6)).unwrap().is_none());

        let record = db.get_address(rich).unwrap().unwrap();
        assert_eq!(record.balance, "2.5");
        assert_eq!(record.balance_decimal, 2.5);
        assert_eq!(record.nonce, 3);

        let next = db.get_checkpoint(CheckpointKey::SweepWatermark).unwrap().unwrap();
        assert_eq!(next, summary.started_at);
        assert!(next >= watermark);
    }

    #[tokio::test]
    async fn test_first_sweep_covers_whole_history() {
        let chain = Arc::new(TestChain::new(3, 1));
        let db = Arc::new(MemoryDb::default());
        seed(&chain, &db);

        let summary = sweeper(chain, &db).sweep_once().await.unwrap();
        assert_eq!(summary.watermark, 0);
        assert!(db.get_address(TestChain::miner(0)).unwrap().is_some());
    }

    fn mock_client(
        balance: impl Fn(Address) -> Result<U256, ChainClientError> + Send + 'static,
        nonce: impl Fn(Address) -> Result<u64, ChainClientError> + Send + 'static,
    ) -> MockChainClient {
        let mut client = MockChainClient::new();
        client.expect_get_balance().returning(balance);
        client.expect_get_transaction_count().returning(nonce);
        client
    }

    #[tokio::test]
    async fn test_unsupported_nonce_still_updates_balances() {
        let chain = TestChain::new(2, 1);
        let db = Arc::new(MemoryDb::default());
        seed(&chain, &db);
        let known = TestChain::miner(1);
        db.upsert_address(AddressRecord { address: known, nonce: 9, ..Default::default() })
            .unwrap();

        let client = mock_client(
            |_| Ok(U256::from(10u64).pow(U256::from(18u64))),
            |_| Err(ChainClientError::Unsupported("eth_getTransactionCount".into())),
        );
        let summary = sweeper(Arc::new(client), &db).sweep_once().await.unwrap();
        assert_eq!(summary.updated, summary.candidates);
        assert_eq!(summary.failed + summary.skipped, 0);

        let record = db.get_address(known).unwrap().unwrap();
        assert_eq!(record.balance, "1");
        assert_eq!(record.nonce, 9);
        assert_eq!(record.last_updated, summary.started_at);
        assert_eq!(db.get_address(TestChain::miner(2)).unwrap().unwrap().nonce, 0);
        assert_eq!(
            db.get_checkpoint(CheckpointKey::SweepWatermark).unwrap(),
            Some(summary.started_at)
        );
    }

    #[tokio::test]
    async fn test_refused_balance_is_skipped_and_watermark_advances() {
        let chain = TestChain::new(2, 1);
        let db = Arc::new(MemoryDb::default());
        seed(&chain, &db);
        db.set_checkpoint(CheckpointKey::SweepWatermark, TestChain::timestamp(2)).unwrap();

        let client = mock_client(
            |address| {
                if address == TestChain::miner(2) {
                    Err(ChainClientError::Malformed("bad balance".into()))
                } else {
                    Ok(U256::from(1u64))
                }
            },
            |_| Ok(0),
        );
        let summary = sweeper(Arc::new(client), &db).sweep_once().await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.updated, summary.candidates - 1);
        assert!(db.get_address(TestChain::miner(2)).unwrap().is_none());
        assert_eq!(
            db.get_checkpoint(CheckpointKey::SweepWatermark).unwrap(),
            Some(summary.started_at)
        );
    }

    #[tokio::test]
    async fn test_failed_write_keeps_watermark() {
        let chain = Arc::new(TestChain::new(2, 1));
        let db = Arc::new(MemoryDb::default());
        seed(&chain, &db);
        db.set_checkpoint(CheckpointKey::SweepWatermark, TestChain::timestamp(2)).unwrap();
        db.fail_address_writes(1);

        let summary = sweeper(chain, &db).sweep_once().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.updated, summary.candidates - 1);
        assert_eq!(
            db.get_checkpoint(CheckpointKey::SweepWatermark).unwrap(),
            Some(TestChain::timestamp(2))
        );
    }
}
