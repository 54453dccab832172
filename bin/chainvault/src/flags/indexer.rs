//! Indexer tuning flags.

use chainvault_core::IndexerConfig;
use clap::Args;
use std::{path::PathBuf, time::Duration};
use url::Url;

/// Connection, datastore and tuning arguments of the `node` subcommand.
///
/// Durations are given in seconds.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub(crate) struct IndexerArgs {
    /// URL of the upstream node's JSON-RPC API.
    #[arg(long = "rpc.url", env = "CHAINVAULT_RPC_URL")]
    pub(crate) rpc_url: Url,
    /// Directory of the local datastore.
    #[arg(long, env = "CHAINVAULT_DATADIR")]
    pub(crate) datadir: PathBuf,
    /// Lowest height covered by backfill passes.
    #[arg(long = "backfill.start", default_value_t = 0, env = "CHAINVAULT_BACKFILL_START")]
    pub(crate) backfill_start: u64,
    /// Pause between two backfill passes.
    #[arg(
        long = "backfill.pass-delay",
        default_value_t = 15,
        env = "CHAINVAULT_BACKFILL_PASS_DELAY"
    )]
    pub(crate) backfill_pass_delay: u64,
    /// Pause between balance sweeps.
    #[arg(long = "sweep.interval", default_value_t = 300, env = "CHAINVAULT_SWEEP_INTERVAL")]
    pub(crate) sweep_interval: u64,
    /// Addresses refreshed concurrently during a sweep.
    #[arg(
        long = "sweep.concurrency",
        default_value_t = 16,
        env = "CHAINVAULT_SWEEP_CONCURRENCY"
    )]
    pub(crate) sweep_concurrency: usize,
    /// Wait between observing a new head and fetching it.
    #[arg(long = "head.settle-delay", default_value_t = 5, env = "CHAINVAULT_HEAD_SETTLE_DELAY")]
    pub(crate) settle_delay: u64,
    /// Poll interval used when the node does not support head filters.
    #[arg(
        long = "head.poll-interval",
        default_value_t = 2,
        env = "CHAINVAULT_HEAD_POLL_INTERVAL"
    )]
    pub(crate) head_poll_interval: u64,
    /// Lower bound of the jittered retry delay.
    #[arg(long = "retry.min-delay", default_value_t = 10, env = "CHAINVAULT_RETRY_MIN_DELAY")]
    pub(crate) retry_min_delay: u64,
    /// Upper bound of the jittered retry delay.
    #[arg(long = "retry.max-delay", default_value_t = 60, env = "CHAINVAULT_RETRY_MAX_DELAY")]
    pub(crate) retry_max_delay: u64,
    /// Transactions written per storage batch.
    #[arg(long = "writer.batch-size", default_value_t = 1000, env = "CHAINVAULT_BATCH_SIZE")]
    pub(crate) batch_size: usize,
    /// Purge-and-refetch repairs allowed per consistency check.
    #[arg(long = "reorg.max-depth", default_value_t = 64, env = "CHAINVAULT_MAX_REORG_DEPTH")]
    pub(crate) max_reorg_depth: usize,
    /// Missing parents fetched per consistency check.
    #[arg(long = "reorg.max-gap-fill", default_value_t = 256, env = "CHAINVAULT_MAX_GAP_FILL")]
    pub(crate) max_gap_fill: usize,
    /// Decimal exponent between the base unit and the display unit.
    #[arg(long, default_value_t = 18, env = "CHAINVAULT_DECIMALS")]
    pub(crate) decimals: u8,
}

impl IndexerArgs {
    /// Builds the [`IndexerConfig`] described by these flags.
    pub(crate) fn config(&self) -> IndexerConfig {
        let mut config = IndexerConfig::new(self.rpc_url.clone(), self.datadir.clone());
        config.backfill_start = self.backfill_start;
        config.backfill_pass_delay = Duration::from_secs(self.backfill_pass_delay);
        config.sweep_interval = Duration::from_secs(self.sweep_interval);
        config.sweep_concurrency = self.sweep_concurrency;
        config.settle_delay = Duration::from_secs(self.settle_delay);
        config.head_poll_interval = Duration::from_secs(self.head_poll_interval);
        config.retry_min_delay = Duration::from_secs(self.retry_min_delay);
        config.retry_max_delay = Duration::from_secs(self.retry_max_delay);
        config.batch_size = self.batch_size;
        config.max_reorg_depth = self.max_reorg_depth;
        config.max_gap_fill = self.max_gap_fill;
        config.decimals = self.decimals;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use rstest::rstest;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        indexer: IndexerArgs,
    }

    const REQUIRED: [&str; 5] =
        ["test", "--rpc.url", "http://127.0.0.1:8545", "--datadir", "/tmp/chainvault"];

    #[test]
    fn test_defaults_match_config_defaults() {
        let cli = TestCli::try_parse_from(REQUIRED).unwrap();
        let expected = IndexerConfig::new(
            Url::parse("http://127.0.0.1:8545").unwrap(),
            PathBuf::from("/tmp/chainvault"),
        );
        assert_eq!(cli.indexer.config(), expected);
    }

    #[rstest]
    #[case::missing_url(&["test", "--datadir", "/tmp/chainvault"])]
    #[case::missing_datadir(&["test", "--rpc.url", "http://127.0.0.1:8545"])]
    #[case::bad_url(&["test", "--rpc.url", "not a url", "--datadir", "/tmp/chainvault"])]
    fn test_rejected_arguments(#[case] args: &[&str]) {
        assert!(TestCli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_tunables_are_applied() {
        let args = REQUIRED.iter().copied().chain([
            "--backfill.start",
            "100",
            "--sweep.interval",
            "60",
            "--retry.min-delay",
            "1",
            "--retry.max-delay",
            "2",
            "--reorg.max-depth",
            "8",
            "--decimals",
            "6",
        ]);
        let config = TestCli::try_parse_from(args).unwrap().indexer.config();
        assert_eq!(config.backfill_start, 100);
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.retry_min_delay, Duration::from_secs(1));
        assert_eq!(config.retry_max_delay, Duration::from_secs(2));
        assert_eq!(config.max_reorg_depth, 8);
        assert_eq!(config.decimals, 6);
        assert!(config.validate().is_ok());
    }
}
