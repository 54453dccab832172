//! Progress markers that must survive a restart.

use reth_db_api::table::Table;
use serde::{Deserialize, Serialize};

/// Key identifying a particular checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CheckpointKey {
    /// Start time of the last completed balance sweep.
    SweepWatermark,
    /// Highest height covered by the last completed backfill pass.
    BackfillHead,
}

impl From<CheckpointKey> for u64 {
    fn from(key: CheckpointKey) -> Self {
        match key {
            CheckpointKey::SweepWatermark => 0,
            CheckpointKey::BackfillHead => 1,
        }
    }
}

/// A single checkpoint value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The recorded value.
    pub value: u64,
}

/// A table for storing checkpoints.
///
/// - **Key**: `u64`: derived from [`CheckpointKey`]
/// - **Value**: [`Checkpoint`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct Checkpoints;

impl Table for Checkpoints {
    const NAME: &'static str = "checkpoints";

    const DUPSORT: bool = false;

    type Key = u64;

    type Value = Checkpoint;
}
