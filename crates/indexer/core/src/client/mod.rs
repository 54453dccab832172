//! Boundary to the upstream chain node.

use crate::ChainClientError;
use alloy_primitives::{Address, B256, Bytes, U256};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt::Debug;

mod alloy;
pub use alloy::AlloyChainClient;

/// Reference to a block on the upstream chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    /// Block at the given height of the canonical chain.
    Number(u64),
    /// Block with the given hash.
    Hash(B256),
    /// Current canonical head.
    Latest,
}

/// A transaction as returned by the upstream node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    /// Transaction hash.
    pub hash: B256,
    /// Sender.
    pub from: Address,
    /// Recipient, `None` for contract creation.
    pub to: Option<Address>,
    /// Transferred value in base units.
    pub value: U256,
}

/// A block as returned by the upstream node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBlock {
    /// Height.
    pub number: u64,
    /// Block hash.
    pub hash: B256,
    /// Hash of the parent block.
    pub parent_hash: B256,
    /// Seconds since Unix epoch.
    pub timestamp: u64,
    /// Beneficiary of the block reward.
    pub miner: Address,
    /// Arbitrary producer data.
    pub extra_data: Bytes,
    /// Number of transactions included in the block.
    pub transaction_count: u64,
    /// Transaction bodies. Empty when the block was fetched without them.
    pub transactions: Vec<ChainTransaction>,
}

/// Lazy, unbounded sequence of new head hashes.
///
/// The stream ends or yields an error when the subscription breaks; callers
/// resubscribe.
pub type HeadStream = BoxStream<'static, Result<B256, ChainClientError>>;

/// Calls the ingestion engine makes against the upstream node.
///
/// Every call may fail with [`ChainClientError::Disconnected`] or
/// [`ChainClientError::Transient`], which callers retry with backoff.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync + Debug {
    /// Returns `true` if the node answers requests.
    async fn is_connected(&self) -> bool;

    /// Returns the height of the canonical head.
    async fn block_number(&self) -> Result<u64, ChainClientError>;

    /// Fetches a block, with transaction bodies when `full` is set.
    ///
    /// Returns `Ok(None)` if the block does not exist (yet).
    async fn get_block(
        &self,
        block: BlockRef,
        full: bool,
    ) -> Result<Option<ChainBlock>, ChainClientError>;

    /// Returns the balance of `address` in base units at the head.
    async fn get_balance(&self, address: Address) -> Result<U256, ChainClientError>;

    /// Returns the number of transactions sent from `address`.
    async fn get_transaction_count(&self, address: Address) -> Result<u64, ChainClientError>;

    /// Subscribes to new head hashes.
    ///
    /// Fails with [`ChainClientError::Unsupported`] if the node offers no
    /// head notification capability.
    async fn new_heads(&self) -> Result<HeadStream, ChainClientError>;
}
