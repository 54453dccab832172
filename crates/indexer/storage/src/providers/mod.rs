//! Providers for indexer state.
//!
//! Each provider wraps a borrowed database transaction and implements one
//! concern on top of it:
//! - Blocks and their transactions (via [`BlockProvider`])
//! - Account balance snapshots (via [`AddressProvider`])
//! - Progress checkpoints (via [`CheckpointProvider`])
mod block_provider;
pub(crate) use block_provider::BlockProvider;

mod address_provider;
pub(crate) use address_provider::AddressProvider;

mod checkpoint_provider;
pub(crate) use checkpoint_provider::CheckpointProvider;
