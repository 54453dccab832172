//! Runtime configuration of the ingestion engine.

use std::{path::PathBuf, time::Duration};
use thiserror::Error;
use url::Url;

/// Largest unit exponent whose scale still fits a 256-bit integer.
const MAX_DECIMALS: u8 = 77;

/// Configuration shared by every ingestion task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerConfig {
    /// Upstream node endpoint.
    pub rpc_url: Url,
    /// Directory holding the datastore.
    pub datadir: PathBuf,
    /// Lowest height covered by backfill passes.
    pub backfill_start: u64,
    /// Pause between balance sweeps.
    pub sweep_interval: Duration,
    /// Wait between observing a new head and fetching it.
    pub settle_delay: Duration,
    /// Poll interval of the head source.
    pub head_poll_interval: Duration,
    /// Lower bound of the jittered retry delay.
    pub retry_min_delay: Duration,
    /// Upper bound of the jittered retry delay.
    pub retry_max_delay: Duration,
    /// Number of transactions written per storage batch.
    pub batch_size: usize,
    /// Maximum number of purge-and-refetch repairs per checker invocation.
    pub max_reorg_depth: usize,
    /// Maximum number of missing parents fetched per checker invocation.
    pub max_gap_fill: usize,
    /// Pause between two backfill passes.
    pub backfill_pass_delay: Duration,
    /// Number of addresses refreshed concurrently during a sweep.
    pub sweep_concurrency: usize,
    /// Decimal exponent between the base unit and the display unit.
    pub decimals: u8,
}

impl IndexerConfig {
    /// Creates a configuration for the given endpoint and datastore directory,
    /// with every tunable at its default.
    pub const fn new(rpc_url: Url, datadir: PathBuf) -> Self {
        Self {
            rpc_url,
            datadir,
            backfill_start: 0,
            sweep_interval: Duration::from_secs(300),
            settle_delay: Duration::from_secs(5),
            head_poll_interval: Duration::from_secs(2),
            retry_min_delay: Duration::from_secs(10),
            retry_max_delay: Duration::from_secs(60),
            batch_size: 1000,
            max_reorg_depth: 64,
            max_gap_fill: 256,
            backfill_pass_delay: Duration::from_secs(15),
            sweep_concurrency: 16,
            decimals: 18,
        }
    }

    /// Checks the invariants the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_min_delay > self.retry_max_delay {
            return Err(ConfigError::RetryBounds {
                min: self.retry_min_delay,
                max: self.retry_max_delay,
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.max_reorg_depth == 0 {
            return Err(ConfigError::ZeroReorgDepth);
        }
        if self.sweep_concurrency == 0 {
            return Err(ConfigError::ZeroSweepConcurrency);
        }
        if self.decimals > MAX_DECIMALS {
            return Err(ConfigError::Decimals(self.decimals));
        }
        Ok(())
    }
}

/// Invalid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The retry delay bounds are inverted.
    #[error("retry delay lower bound {min:?} exceeds upper bound {max:?}")]
    RetryBounds {
        /// Lower bound.
        min: Duration,
        /// Upper bound.
        max: Duration,
    },
    /// Transactions cannot be written in empty batches.
    #[error("batch size must be positive")]
    ZeroBatchSize,
    /// The checker must be allowed at least one repair.
    #[error("maximum reorg depth must be positive")]
    ZeroReorgDepth,
    /// The sweeper needs at least one concurrent request.
    #[error("sweep concurrency must be positive")]
    ZeroSweepConcurrency,
    /// The unit exponent overflows a 256-bit integer.
    #[error("unit decimals {0} exceed {MAX_DECIMALS}")]
    Decimals(u8),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn config() -> IndexerConfig {
        IndexerConfig::new(
            Url::parse("http://127.0.0.1:8545").expect("valid url"),
            PathBuf::from("/tmp/chainvault"),
        )
    }

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(config().validate(), Ok(()));
    }

    #[rstest]
    #[case::inverted_retry(
        |c: &mut IndexerConfig| c.retry_min_delay = Duration::from_secs(61),
        ConfigError::RetryBounds { min: Duration::from_secs(61), max: Duration::from_secs(60) }
    )]
    #[case::zero_batch(|c: &mut IndexerConfig| c.batch_size = 0, ConfigError::ZeroBatchSize)]
    #[case::zero_depth(|c: &mut IndexerConfig| c.max_reorg_depth = 0, ConfigError::ZeroReorgDepth)]
    #[case::zero_concurrency(
        |c: &mut IndexerConfig| c.sweep_concurrency = 0,
        ConfigError::ZeroSweepConcurrency
    )]
    #[case::decimals(|c: &mut IndexerConfig| c.decimals = 78, ConfigError::Decimals(78))]
    fn test_invalid_config(#[case] tweak: fn(&mut IndexerConfig), #[case] expected: ConfigError) {
        let mut config = config();
        tweak(&mut config);
        assert_eq!(config.validate(), Err(expected));
    }
}
