#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod config;
pub use config::{ConfigError, IndexerConfig};

mod error;
pub use error::{ChainClientError, IndexerError, RetryError, WriterError};

mod metrics;
pub use metrics::Metrics;

mod client;
pub use client::{
    AlloyChainClient, BlockRef, ChainBlock, ChainClient, ChainTransaction, HeadStream,
};

mod retry;
pub use retry::{Jitter, JitteredBackoff, Retrier};

mod writer;
pub use writer::{BlockWriter, to_decimal_string};

mod consistency;
pub use consistency::{ConsistencyChecker, RepairReport, RepairState};

mod backfill;
pub use backfill::{BackfillScanner, ScanEnd, ScanSummary};

mod watcher;
pub use watcher::{HeadSource, LiveWatcher};

mod sweeper;
pub use sweeper::{BalanceSweeper, SweepSummary};

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
