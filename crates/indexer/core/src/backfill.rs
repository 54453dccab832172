//! Continuous historical backfill.

use crate::{ChainClient, ConsistencyChecker, IndexerError, Metrics, RepairReport, Retrier};
use chainvault_storage::{CheckpointKey, IndexStorage};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

/// Upper bound of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEnd {
    /// A fixed height.
    Height(u64),
    /// The upstream head, resolved once when the scan starts.
    Latest,
}

/// Counters of one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Lowest scanned height.
    pub start: u64,
    /// Highest scanned height.
    pub end: u64,
    /// Heights fetched because no block was stored.
    pub fetched: usize,
    /// Heights that were already stored and only verified.
    pub verified: usize,
    /// Heights whose check repaired divergent or missing blocks.
    pub repaired: usize,
    /// Heights whose repair was abandoned at the depth bound.
    pub abandoned: usize,
    /// Heights the upstream node did not serve.
    pub missing: usize,
    /// Heights that failed with an error.
    pub failed: usize,
    /// `false` if the scan was interrupted by shutdown.
    pub complete: bool,
}

enum HeightOutcome {
    Verified(RepairReport),
    Fetched(RepairReport),
    Missing,
}

impl ScanSummary {
    fn record(&mut self, outcome: HeightOutcome) {
        let report = match outcome {
            HeightOutcome::Verified(report) => {
                self.verified += 1;
                report
            }
            HeightOutcome::Fetched(report) => {
                self.fetched += 1;
                report
            }
            HeightOutcome::Missing => {
                self.missing += 1;
                return;
            }
        };
        match report {
            RepairReport::Consistent => {}
            RepairReport::Repaired { .. } => self.repaired += 1,
            RepairReport::Abandoned { .. } => self.abandoned += 1,
        }
    }
}

/// Walks `[start, latest]` in descending order, over and over.
///
/// Missing heights are fetched and stored, stored heights are re-verified.
/// The scan bounds are re-derived on every pass, so a restart resumes without
/// any in-memory state.
#[derive(Debug)]
pub struct BackfillScanner<C, DB> {
    client: Arc<C>,
    checker: Arc<ConsistencyChecker<C, DB>>,
    retrier: Retrier,
    start: u64,
    pass_delay: Duration,
}

impl<C, DB> BackfillScanner<C, DB>
where
    C: ChainClient,
    DB: IndexStorage,
{
    /// Creates a scanner covering heights from `start` upwards.
    pub const fn new(
        client: Arc<C>,
        checker: Arc<ConsistencyChecker<C, DB>>,
        retrier: Retrier,
        start: u64,
        pass_delay: Duration,
    ) -> Self {
        Self { client, checker, retrier, start, pass_delay }
    }

    /// Lowest height covered by passes.
    pub const fn start(&self) -> u64 {
        self.start
    }

    /// Runs passes over `[start, latest]` until cancelled.
    pub async fn run(&self) {
        info!(target: "backfill", start = self.start, "Starting backfill scanner");
        let cancellation = self.retrier.cancellation().clone();

        loop {
            if self.retrier.wait_for_connection(self.client.as_ref()).await.is_err() {
                break;
            }

            match self.scan_range(self.start, ScanEnd::Latest).await {
                Ok(summary) if summary.complete => self.finish_pass(&summary),
                Ok(summary) => {
                    debug!(target: "backfill", end = summary.end, "Backfill pass interrupted")
                }
                Err(err) if err.is_cancelled() => break,
                Err(err) => warn!(target: "backfill", %err, "Backfill pass failed"),
            }

            tokio::select! {
                _ = cancellation.cancelled() => break,
                _ = tokio::time::sleep(self.pass_delay) => {}
            }
        }
        info!(target: "backfill", "Backfill scanner stopped");
    }

    /// Scans `[start, end]` once, from the top down.
    ///
    /// Errors at a single height are logged and counted; the scan continues
    /// with the next height.
    pub async fn scan_range(&self, start: u64, end: ScanEnd) -> Result<ScanSummary, IndexerError> {
        let end = match end {
            ScanEnd::Height(height) => height,
            ScanEnd::Latest => {
                let client = self.client.as_ref();
                self.retrier.run("block_number", move || client.block_number()).await?
            }
        };

        let mut summary = ScanSummary { start, end, ..Default::default() };
        if end < start {
            summary.complete = true;
            return Ok(summary);
        }
        debug!(target: "backfill", start, end, "Scanning range");

        for number in (start..=end).rev() {
            if self.retrier.cancellation().is_cancelled() {
                return Ok(summary);
            }
            match self.scan_height(number).await {
                Ok(outcome) => summary.record(outcome),
                Err(err) if err.is_cancelled() => return Ok(summary),
                Err(err) => {
                    warn!(target: "backfill", block_number = number, %err, "Failed to process height");
                    summary.failed += 1;
                }
            }
        }

        summary.complete = true;
        Ok(summary)
    }

    async fn scan_height(&self, number: u64) -> Result<HeightOutcome, IndexerError> {
        if self.checker.writer().db().get_block(number)?.is_some() {
            return Ok(HeightOutcome::Verified(self.checker.verify(number).await?));
        }

        match self.checker.fetch_block(number).await? {
            Some(block) => Ok(HeightOutcome::Fetched(self.checker.verify_block(&block).await?)),
            None => Ok(HeightOutcome::Missing),
        }
    }

    fn finish_pass(&self, summary: &ScanSummary) {
        Metrics::record_backfill_pass();
        if let Err(err) =
            self.checker.writer().db().set_checkpoint(CheckpointKey::BackfillHead, summary.end)
        {
            error!(target: "backfill", %err, "Failed to persist backfill checkpoint");
        }
        info!(
            target: "backfill",
            start = summary.start,
            end = summary.end,
            fetched = summary.fetched,
            verified = summary.verified,
            repaired = summary.repaired,
            abandoned = summary.abandoned,
            failed = summary.failed,
            "Backfill pass complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BlockWriter, test_utils::TestChain};
    use chainvault_storage::{BlockStorageReader, CheckpointStorage, MemoryDb};
    use rstest::rstest;
    use tokio_util::sync::CancellationToken;

    fn scanner(
        chain: &Arc<TestChain>,
        db: &Arc<MemoryDb>,
        max_gap_fill: usize,
        cancellation: CancellationToken,
    ) -> BackfillScanner<TestChain, MemoryDb> {
        let writer = Arc::new(BlockWriter::new(db.clone(), 1000, 18));
        let retrier = Retrier::new(Duration::from_secs(1), Duration::from_secs(2), cancellation);
        let checker = Arc::new(ConsistencyChecker::new(
            chain.clone(),
            writer,
            retrier.clone(),
            16,
            max_gap_fill,
        ));
        BackfillScanner::new(chain.clone(), checker, retrier, 0, Duration::from_secs(15))
    }

    fn assert_linked(db: &MemoryDb, tip: u64) {
        for number in 1..=tip {
            let block = db.get_block(number).unwrap().expect("block stored");
            let parent = db.get_block(number - 1).unwrap().expect("parent stored");
            assert_eq!(block.parent_hash, parent.hash, "broken linkage at {number}");
        }
    }

    #[tokio::test]
    async fn test_single_pass_fills_every_height() {
        let chain = Arc::new(TestChain::new(25, 2));
        let db = Arc::new(MemoryDb::default());
        let scanner = scanner(&chain, &db, 0, CancellationToken::new());

        let summary = scanner.scan_range(0, ScanEnd::Latest).await.unwrap();
        assert!(summary.complete);
        assert_eq!(summary.end, 25);
        assert_eq!(summary.fetched, 26);
        assert_eq!(summary.failed, 0);
        assert_linked(&db, 25);
    }

    #[tokio::test]
    async fn test_stored_heights_are_verified_without_refetch() {
        let chain = Arc::new(TestChain::new(10, 1));
        let db = Arc::new(MemoryDb::default());
        let scanner = scanner(&chain, &db, 0, CancellationToken::new());
        scanner.scan_range(0, ScanEnd::Height(10)).await.unwrap();
        let requests = chain.block_requests();

        let summary = scanner.scan_range(0, ScanEnd::Height(10)).await.unwrap();
        assert_eq!(summary.verified, 11);
        assert_eq!(summary.fetched, 0);
        assert_eq!(chain.block_requests(), requests);
    }

    #[tokio::test]
    async fn test_gap_fill_cooperates_with_scan() {
        let chain = Arc::new(TestChain::new(12, 1));
        let db = Arc::new(MemoryDb::default());
        let scanner = scanner(&chain, &db, 4, CancellationToken::new());

        let summary = scanner.scan_range(0, ScanEnd::Latest).await.unwrap();
        assert!(summary.fetched < 13);
        assert_eq!(summary.fetched + summary.verified, 13);
        assert_linked(&db, 12);
    }

    #[rstest]
    #[case::malformed(TestChain::serve_malformed)]
    #[case::wrong_number(TestChain::serve_wrong_number)]
    #[tokio::test]
    async fn test_bad_height_is_counted_and_skipped(#[case] fault: fn(&TestChain, u64)) {
        let chain = Arc::new(TestChain::new(10, 1));
        let db = Arc::new(MemoryDb::default());
        let scanner = scanner(&chain, &db, 0, CancellationToken::new());
        fault(&chain, 5);

        let summary = scanner.scan_range(0, ScanEnd::Latest).await.unwrap();
        assert!(summary.complete);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.fetched, 10);
        assert!(db.get_block(5).unwrap().is_none());
        for number in (0..=10).filter(|n| *n != 5) {
            let stored = db.get_block(number).unwrap().expect("block stored");
            assert_eq!(stored.hash, chain.block_at(number).unwrap().hash);
        }
        assert_linked(&db, 4);

        chain.clear_faults();
        let summary = scanner.scan_range(0, ScanEnd::Latest).await.unwrap();
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.fetched, 1);
        assert_linked(&db, 10);
    }

    #[tokio::test]
    async fn test_cancelled_scan_is_incomplete() {
        let chain = Arc::new(TestChain::new(5, 1));
        let db = Arc::new(MemoryDb::default());
        let cancellation = CancellationToken::new();
        let scanner = scanner(&chain, &db, 0, cancellation.clone());
        cancellation.cancel();

        let summary = scanner.scan_range(0, ScanEnd::Height(5)).await.unwrap();
        assert!(!summary.complete);
        assert!(db.latest_block().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_waits_for_node_and_follows_new_blocks() {
        let chain = Arc::new(TestChain::new(5, 1));
        let db = Arc::new(MemoryDb::default());
        let cancellation = CancellationToken::new();
        let scanner = Arc::new(scanner(&chain, &db, 0, cancellation.clone()));
        chain.set_connected(false);

        let handle = tokio::spawn({
            let scanner = scanner.clone();
            async move { scanner.run().await }
        });

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(db.latest_block().unwrap().is_none());

        chain.set_connected(true);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_linked(&db, 5);
        assert_eq!(db.get_checkpoint(CheckpointKey::BackfillHead).unwrap(), Some(5));

        chain.extend(3);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_linked(&db, 8);
        assert_eq!(db.get_checkpoint(CheckpointKey::BackfillHead).unwrap(), Some(8));

        cancellation.cancel();
        handle.await.expect("scanner panicked");
    }
}
