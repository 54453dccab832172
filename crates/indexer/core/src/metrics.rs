//! Metrics of the ingestion engine.

use chainvault_storage::InsertOutcome;

/// Container for the metric names and recorders of the ingestion engine.
#[derive(Debug, Clone)]
pub struct Metrics;

impl Metrics {
    /// Blocks written, labelled by insert outcome.
    pub const BLOCKS_STORED_TOTAL: &'static str = "chainvault_blocks_stored_total";
    /// Transactions written.
    pub const TRANSACTIONS_STORED_TOTAL: &'static str = "chainvault_transactions_stored_total";
    /// Transaction batches the datastore rejected.
    pub const FAILED_BATCHES_TOTAL: &'static str = "chainvault_failed_batches_total";
    /// Purge-and-refetch repairs.
    pub const REORG_REPAIRS_TOTAL: &'static str = "chainvault_reorg_repairs_total";
    /// Depth of completed repair walks.
    pub const REORG_REPAIR_DEPTH: &'static str = "chainvault_reorg_repair_depth";
    /// Repair walks abandoned at the depth bound.
    pub const REORG_ABANDONED_TOTAL: &'static str = "chainvault_reorg_abandoned_total";
    /// Missing parents fetched by the checker.
    pub const GAPS_FILLED_TOTAL: &'static str = "chainvault_gaps_filled_total";
    /// Completed backfill passes.
    pub const BACKFILL_PASSES_TOTAL: &'static str = "chainvault_backfill_passes_total";
    /// Address records refreshed by the sweeper.
    pub const ADDRESSES_SWEPT_TOTAL: &'static str = "chainvault_addresses_swept_total";
    /// Upstream calls retried after a transient failure.
    pub const RPC_RETRIES_TOTAL: &'static str = "chainvault_rpc_retries_total";

    /// Describes and zeroes every metric.
    pub fn init() {
        Self::describe();
        Self::zero();
    }

    fn describe() {
        metrics::describe_counter!(
            Self::BLOCKS_STORED_TOTAL,
            metrics::Unit::Count,
            "Blocks handed to the datastore, by insert outcome",
        );
        metrics::describe_counter!(
            Self::TRANSACTIONS_STORED_TOTAL,
            metrics::Unit::Count,
            "Transactions inserted into the datastore",
        );
        metrics::describe_counter!(
            Self::FAILED_BATCHES_TOTAL,
            metrics::Unit::Count,
            "Transaction batches rejected by the datastore",
        );
        metrics::describe_counter!(
            Self::REORG_REPAIRS_TOTAL,
            metrics::Unit::Count,
            "Heights purged and refetched by the consistency checker",
        );
        metrics::describe_histogram!(
            Self::REORG_REPAIR_DEPTH,
            metrics::Unit::Count,
            "Number of repairs per completed repair walk",
        );
        metrics::describe_counter!(
            Self::REORG_ABANDONED_TOTAL,
            metrics::Unit::Count,
            "Repair walks abandoned at the maximum depth",
        );
        metrics::describe_counter!(
            Self::GAPS_FILLED_TOTAL,
            metrics::Unit::Count,
            "Missing parents fetched by the consistency checker",
        );
        metrics::describe_counter!(
            Self::BACKFILL_PASSES_TOTAL,
            metrics::Unit::Count,
            "Completed backfill passes",
        );
        metrics::describe_counter!(
            Self::ADDRESSES_SWEPT_TOTAL,
            metrics::Unit::Count,
            "Address balances refreshed by the sweeper",
        );
        metrics::describe_counter!(
            Self::RPC_RETRIES_TOTAL,
            metrics::Unit::Count,
            "Upstream calls retried after a transient failure",
        );
    }

    fn zero() {
        for outcome in ["inserted", "already_present", "conflict"] {
            metrics::counter!(Self::BLOCKS_STORED_TOTAL, "outcome" => outcome).increment(0);
        }
        metrics::counter!(Self::TRANSACTIONS_STORED_TOTAL).increment(0);
        metrics::counter!(Self::FAILED_BATCHES_TOTAL).increment(0);
        metrics::counter!(Self::REORG_REPAIRS_TOTAL).increment(0);
        metrics::histogram!(Self::REORG_REPAIR_DEPTH).record(0);
        metrics::counter!(Self::REORG_ABANDONED_TOTAL).increment(0);
        metrics::counter!(Self::GAPS_FILLED_TOTAL).increment(0);
        metrics::counter!(Self::BACKFILL_PASSES_TOTAL).increment(0);
        metrics::counter!(Self::ADDRESSES_SWEPT_TOTAL).increment(0);
        metrics::counter!(Self::RPC_RETRIES_TOTAL).increment(0);
    }

    pub(crate) fn record_block_stored(outcome: &InsertOutcome) {
        let label = match outcome {
            InsertOutcome::Inserted => "inserted",
            InsertOutcome::AlreadyPresent => "already_present",
            InsertOutcome::Conflict { .. } => "conflict",
        };
        metrics::counter!(Self::BLOCKS_STORED_TOTAL, "outcome" => label).increment(1);
    }

    pub(crate) fn record_transactions_stored(count: usize) {
        metrics::counter!(Self::TRANSACTIONS_STORED_TOTAL).increment(count as u64);
    }

    pub(crate) fn record_failed_batch() {
        metrics::counter!(Self::FAILED_BATCHES_TOTAL).increment(1);
    }

    pub(crate) fn record_repair() {
        metrics::counter!(Self::REORG_REPAIRS_TOTAL).increment(1);
    }

    pub(crate) fn record_repair_walk(repairs: usize) {
        metrics::histogram!(Self::REORG_REPAIR_DEPTH).record(repairs as f64);
    }

    pub(crate) fn record_abandoned() {
        metrics::counter!(Self::REORG_ABANDONED_TOTAL).increment(1);
    }

    pub(crate) fn record_gap_filled() {
        metrics::counter!(Self::GAPS_FILLED_TOTAL).increment(1);
    }

    pub(crate) fn record_backfill_pass() {
        metrics::counter!(Self::BACKFILL_PASSES_TOTAL).increment(1);
    }

    pub(crate) fn record_addresses_swept(count: usize) {
        metrics::counter!(Self::ADDRESSES_SWEPT_TOTAL).increment(count as u64);
    }

    pub(crate) fn record_rpc_retry() {
        metrics::counter!(Self::RPC_RETRIES_TOTAL).increment(1);
    }
}
