use chainvault_storage::StoredBlock;
use derive_more::Display;

/// Step of a repair walk.
///
/// A walk starts in [`RepairState::Verifying`], or in
/// [`RepairState::Backfilling`] for a missing height, and ends in
/// [`RepairState::Idle`] or [`RepairState::Failed`]. Every transition
/// through [`RepairState::Purging`] counts towards the depth bound.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum RepairState {
    /// Nothing left to do.
    #[display("idle")]
    Idle,
    /// Fetching the canonical block at a height and storing it.
    #[display("fetching {number}")]
    Fetching {
        /// Height to fetch.
        number: u64,
    },
    /// Checking a stored block against its stored parent.
    #[display("verifying {}", block.number)]
    Verifying {
        /// The child whose linkage is checked.
        block: StoredBlock,
    },
    /// Removing a divergent or incomplete block.
    #[display("purging {number}")]
    Purging {
        /// Height to purge.
        number: u64,
    },
    /// Filling a missing block.
    #[display("backfilling {number}")]
    Backfilling {
        /// Missing height.
        number: u64,
    },
    /// The depth bound was reached.
    #[display("failed at {number}")]
    Failed {
        /// Height whose repair was abandoned.
        number: u64,
    },
}

/// Outcome of a consistency check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairReport {
    /// The checked block links to its stored parent; nothing was changed.
    Consistent,
    /// Divergent or missing blocks were replaced and linkage now holds down to
    /// the last verified height.
    Repaired {
        /// Heights purged and refetched.
        repairs: usize,
        /// Missing blocks fetched.
        filled: usize,
        /// Lowest height touched.
        lowest: u64,
    },
    /// The walk reached the depth bound and was abandoned for this cycle.
    Abandoned {
        /// Height whose repair was abandoned.
        number: u64,
        /// Heights purged and refetched before giving up.
        repairs: usize,
    },
}
