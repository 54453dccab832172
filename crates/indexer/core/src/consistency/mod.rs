//! Parent-linkage verification and reorg repair.

mod state;
pub use state::{RepairReport, RepairState};

mod checker;
pub use checker::ConsistencyChecker;
