//! CLI flags.

mod globals;
pub(crate) use globals::GlobalArgs;

mod indexer;
pub(crate) use indexer::IndexerArgs;
