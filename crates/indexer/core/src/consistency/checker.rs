use super::{RepairReport, RepairState};
use crate::{
    BlockRef, BlockWriter, ChainBlock, ChainClient, ChainClientError, IndexerError, Metrics,
    Retrier, RetryError, writer::stored_block,
};
use chainvault_storage::{IndexStorage, InsertOutcome, StoredBlock};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Verifies that stored blocks link to their stored parents and repairs
/// divergence.
///
/// A check walks downwards from a block. A parent whose hash differs from the
/// child's `parent_hash` is purged and refetched, and the walk continues from
/// the refetched parent; a missing parent is fetched. The walk stops at the
/// first matching parent, at height zero, or when the repair depth bound is
/// reached.
///
/// Checks are idempotent and may run concurrently from several tasks: every
/// step is a keyed upsert or a delete followed by a refetch.
#[derive(Debug)]
pub struct ConsistencyChecker<C, DB> {
    client: Arc<C>,
    writer: Arc<BlockWriter<DB>>,
    retrier: Retrier,
    max_depth: usize,
    max_gap_fill: usize,
}

impl<C, DB> ConsistencyChecker<C, DB>
where
    C: ChainClient,
    DB: IndexStorage,
{
    /// Creates a checker.
    ///
    /// `max_depth` bounds the purge-and-refetch repairs of one walk,
    /// `max_gap_fill` the missing parents it fetches.
    pub const fn new(
        client: Arc<C>,
        writer: Arc<BlockWriter<DB>>,
        retrier: Retrier,
        max_depth: usize,
        max_gap_fill: usize,
    ) -> Self {
        Self { client, writer, retrier, max_depth, max_gap_fill }
    }

    /// Returns the writer used for repairs.
    pub const fn writer(&self) -> &Arc<BlockWriter<DB>> {
        &self.writer
    }

    /// Verifies the stored block at `number`, filling it first if missing.
    pub async fn verify(&self, number: u64) -> Result<RepairReport, IndexerError> {
        let state = match self.writer.db().get_block(number)? {
            Some(block) => RepairState::Verifying { block },
            None => RepairState::Backfilling { number },
        };
        self.walk(state).await
    }

    /// Stores a freshly fetched `block` and verifies it.
    pub async fn verify_block(&self, block: &ChainBlock) -> Result<RepairReport, IndexerError> {
        let state = self.apply(block)?;
        self.walk(state).await
    }

    async fn walk(&self, mut state: RepairState) -> Result<RepairReport, IndexerError> {
        let mut repairs = 0;
        let mut filled = 0;
        let mut lowest = u64::MAX;

        loop {
            trace!(target: "consistency", %state, repairs, filled, "Repair step");
            state = match state {
                RepairState::Idle => break,
                RepairState::Verifying { block } => self.check_parent(&block, filled)?,
                RepairState::Purging { number } if repairs >= self.max_depth => {
                    RepairState::Failed { number }
                }
                RepairState::Purging { number } => {
                    self.writer.purge(number)?;
                    repairs += 1;
                    lowest = lowest.min(number);
                    Metrics::record_repair();
                    RepairState::Fetching { number }
                }
                RepairState::Backfilling { number } => {
                    filled += 1;
                    lowest = lowest.min(number);
                    Metrics::record_gap_filled();
                    RepairState::Fetching { number }
                }
                RepairState::Fetching { number } => self.fetch(number).await?,
                RepairState::Failed { number } => {
                    error!(
                        target: "consistency",
                        block_number = number,
                        repairs,
                        max_depth = self.max_depth,
                        "Reorg repair exceeded maximum depth, abandoning until the next pass"
                    );
                    Metrics::record_abandoned();
                    return Ok(RepairReport::Abandoned { number, repairs });
                }
            };
        }

        if repairs == 0 && filled == 0 {
            return Ok(RepairReport::Consistent);
        }
        if repairs > 0 {
            Metrics::record_repair_walk(repairs);
            info!(target: "consistency", repairs, lowest, "Repaired divergent blocks");
        }
        Ok(RepairReport::Repaired { repairs, filled, lowest })
    }

    /// Stores `block` and picks the next step from the insert outcome.
    fn apply(&self, block: &ChainBlock) -> Result<RepairState, IndexerError> {
        match self.writer.store(block)? {
            InsertOutcome::Inserted | InsertOutcome::AlreadyPresent => {
                Ok(RepairState::Verifying { block: stored_block(block) })
            }
            InsertOutcome::Conflict { .. } => Ok(RepairState::Purging { number: block.number }),
        }
    }

    fn check_parent(&self, block: &StoredBlock, filled: usize) -> Result<RepairState, IndexerError> {
        if !self.writer.transactions_consistent(block)? {
            warn!(
                target: "consistency",
                block_number = block.number,
                expected = block.transactions_count,
                "Stored transactions incomplete, refetching block"
            );
            return Ok(RepairState::Purging { number: block.number });
        }

        let Some(parent_number) = block.number.checked_sub(1) else {
            return Ok(RepairState::Idle);
        };

        let state = match self.writer.db().get_block(parent_number)? {
            Some(parent) if parent.hash == block.parent_hash => RepairState::Idle,
            Some(parent) => {
                info!(
                    target: "consistency",
                    block_number = parent_number,
                    stored_hash = %parent.hash,
                    canonical_hash = %block.parent_hash,
                    "Parent hash mismatch"
                );
                RepairState::Purging { number: parent_number }
            }
            None if filled < self.max_gap_fill => {
                debug!(target: "consistency", block_number = parent_number, "Filling missing parent");
                RepairState::Backfilling { number: parent_number }
            }
            None => {
                debug!(
                    target: "consistency",
                    block_number = parent_number,
                    "Gap fill budget spent, leaving the gap to backfill"
                );
                RepairState::Idle
            }
        };
        Ok(state)
    }

    /// Fetches the canonical block at `number` with its transactions.
    ///
    /// A response for another height is rejected as malformed.
    pub(crate) async fn fetch_block(&self, number: u64) -> Result<Option<ChainBlock>, IndexerError> {
        let client = self.client.as_ref();
        let fetched = self
            .retrier
            .run("get_block", move || client.get_block(BlockRef::Number(number), true))
            .await?;

        match fetched {
            Some(block) if block.number != number => {
                Err(RetryError::Fatal(ChainClientError::Malformed(format!(
                    "requested block {number}, received {}",
                    block.number
                )))
                .into())
            }
            fetched => Ok(fetched),
        }
    }

    async fn fetch(&self, number: u64) -> Result<RepairState, IndexerError> {
        match self.fetch_block(number).await? {
            Some(block) => self.apply(&block),
            None => {
                warn!(target: "consistency", block_number = number, "Block not available upstream");
                Ok(RepairState::Idle)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestChain;
    use chainvault_storage::{BlockStorageReader, MemoryDb};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn checker(
        chain: &Arc<TestChain>,
        db: &Arc<MemoryDb>,
        max_depth: usize,
        max_gap_fill: usize,
    ) -> ConsistencyChecker<TestChain, MemoryDb> {
        let writer = Arc::new(BlockWriter::new(db.clone(), 1000, 18));
        let retrier = Retrier::new(Duration::ZERO, Duration::ZERO, CancellationToken::new());
        ConsistencyChecker::new(chain.clone(), writer, retrier, max_depth, max_gap_fill)
    }

    /// Stores heights `0..=tip` of `chain`.
    async fn seed(checker: &ConsistencyChecker<TestChain, MemoryDb>, chain: &TestChain) {
        for number in 0..=chain.tip() {
            let block = chain.block_at(number).expect("block exists");
            checker.verify_block(&block).await.expect("seed block");
        }
    }

    fn assert_matches_chain(db: &MemoryDb, chain: &TestChain, heights: std::ops::RangeInclusive<u64>) {
        for number in heights {
            let stored = db.get_block(number).unwrap().expect("block stored");
            let canonical = chain.block_at(number).unwrap();
            assert_eq!(stored.hash, canonical.hash, "hash mismatch at {number}");
            assert_eq!(
                db.block_transaction_count(number).unwrap(),
                canonical.transaction_count,
                "transaction mismatch at {number}"
            );
        }
    }

    #[tokio::test]
    async fn test_linked_block_is_consistent() {
        let chain = Arc::new(TestChain::new(5, 2));
        let db = Arc::new(MemoryDb::default());
        let checker = checker(&chain, &db, 8, 8);
        seed(&checker, &chain).await;

        assert_eq!(checker.verify(5).await.unwrap(), RepairReport::Consistent);
        let tip = chain.block_at(5).unwrap();
        assert_eq!(checker.verify_block(&tip).await.unwrap(), RepairReport::Consistent);
    }

    #[tokio::test]
    async fn test_reorg_converges_to_canonical_chain() {
        let chain = Arc::new(TestChain::new(10, 2));
        let db = Arc::new(MemoryDb::default());
        let checker = checker(&chain, &db, 64, 8);
        seed(&checker, &chain).await;

        let replaced = db.block_transactions(6).unwrap();
        chain.reorg_from(6, 1);
        let new_tip = chain.block_at(10).unwrap();

        let report = checker.verify_block(&new_tip).await.unwrap();
        assert_eq!(report, RepairReport::Repaired { repairs: 5, filled: 0, lowest: 6 });

        assert_matches_chain(&db, &chain, 0..=10);
        for tx in replaced {
            assert!(db.get_transaction(tx.hash).unwrap().is_none(), "stale transaction kept");
        }
        assert_eq!(checker.verify(10).await.unwrap(), RepairReport::Consistent);
    }

    #[tokio::test]
    async fn test_repair_abandons_at_max_depth() {
        let chain = Arc::new(TestChain::new(20, 1));
        let db = Arc::new(MemoryDb::default());
        let checker = checker(&chain, &db, 4, 8);
        seed(&checker, &chain).await;
        let original = db.get_block(16).unwrap();

        chain.break_linkage();
        let tip = chain.block_at(20).unwrap();

        let report = checker.verify_block(&tip).await.unwrap();
        assert_eq!(report, RepairReport::Abandoned { number: 16, repairs: 4 });

        for number in 17..=20 {
            assert_eq!(db.get_block(number).unwrap().map(|b| b.hash), Some(tip_hash(&chain, number)));
        }
        assert_eq!(db.get_block(16).unwrap(), original);
    }

    fn tip_hash(chain: &TestChain, number: u64) -> alloy_primitives::B256 {
        chain.block_at(number).unwrap().hash
    }

    #[tokio::test]
    async fn test_missing_parents_are_filled_within_budget() {
        let chain = Arc::new(TestChain::new(10, 1));
        let db = Arc::new(MemoryDb::default());
        let checker = checker(&chain, &db, 4, 3);

        let report = checker.verify_block(&chain.block_at(10).unwrap()).await.unwrap();
        assert_eq!(report, RepairReport::Repaired { repairs: 0, filled: 3, lowest: 7 });
        assert_matches_chain(&db, &chain, 7..=10);
        assert!(db.get_block(6).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_block_without_transactions_is_refetched() {
        let chain = Arc::new(TestChain::new(6, 3));
        let db = Arc::new(MemoryDb::default());
        let checker = checker(&chain, &db, 4, 8);
        seed(&checker, &chain).await;

        db.remove_block_transactions(4).unwrap();
        let report = checker.verify(4).await.unwrap();
        assert_eq!(report, RepairReport::Repaired { repairs: 1, filled: 0, lowest: 4 });
        assert_matches_chain(&db, &chain, 0..=6);
    }

    #[tokio::test]
    async fn test_transactions_without_block_are_completed() {
        let chain = Arc::new(TestChain::new(6, 3));
        let db = Arc::new(MemoryDb::default());
        let checker = checker(&chain, &db, 4, 8);
        seed(&checker, &chain).await;

        db.remove_block_record(3).unwrap();
        let report = checker.verify(3).await.unwrap();
        assert_eq!(report, RepairReport::Repaired { repairs: 0, filled: 1, lowest: 3 });
        assert_matches_chain(&db, &chain, 0..=6);
    }

    #[tokio::test]
    async fn test_response_for_other_height_is_rejected() {
        let chain = Arc::new(TestChain::new(6, 1));
        let db = Arc::new(MemoryDb::default());
        let checker = checker(&chain, &db, 4, 8);
        seed(&checker, &chain).await;

        db.remove_block_record(3).unwrap();
        chain.serve_wrong_number(3);
        let err = checker.verify(3).await.unwrap_err();
        assert!(matches!(
            err,
            IndexerError::Retry(RetryError::Fatal(ChainClientError::Malformed(_)))
        ));
        assert!(db.get_block(3).unwrap().is_none());
        assert_matches_chain(&db, &chain, 0..=2);
        assert_matches_chain(&db, &chain, 4..=6);

        chain.clear_faults();
        assert!(matches!(checker.verify(3).await.unwrap(), RepairReport::Repaired { .. }));
        assert_matches_chain(&db, &chain, 0..=6);
    }

    #[tokio::test]
    async fn test_concurrent_checks_converge() {
        let chain = Arc::new(TestChain::new(8, 2));
        let db = Arc::new(MemoryDb::default());
        let first = checker(&chain, &db, 16, 16);
        let second = checker(&chain, &db, 16, 16);
        let tip = chain.block_at(8).unwrap();

        let (a, b) = tokio::join!(first.verify_block(&tip), second.verify_block(&tip));
        assert!(a.is_ok() && b.is_ok());
        assert_matches_chain(&db, &chain, 0..=8);
    }
}
