//! [`ChainClient`] over an alloy JSON-RPC provider.

use super::{BlockRef, ChainBlock, ChainClient, ChainTransaction, HeadStream};
use crate::ChainClientError;
use alloy_eips::BlockNumberOrTag;
use alloy_primitives::{Address, U256};
use alloy_provider::{Provider, RootProvider};
use alloy_rpc_types_eth::{Block, Header};
use async_trait::async_trait;
use futures::{StreamExt, stream};
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

/// Client talking to the upstream node over HTTP JSON-RPC.
///
/// New heads are delivered through a polled `eth_newBlockFilter`.
#[derive(Debug, Clone)]
pub struct AlloyChainClient {
    provider: RootProvider,
    poll_interval: Duration,
}

impl AlloyChainClient {
    /// Creates a client for `url` that polls head filters every `poll_interval`.
    pub fn new(url: Url, poll_interval: Duration) -> Self {
        Self { provider: RootProvider::new_http(url), poll_interval }
    }
}

fn into_chain_block(block: Block) -> ChainBlock {
    let Block {
        header:
            Header {
                hash,
                inner:
                    alloy_consensus::Header {
                        number,
                        parent_hash,
                        timestamp,
                        beneficiary,
                        extra_data,
                        ..
                    },
                ..
            },
        transactions,
        ..
    } = block;

    let transaction_count = transactions.len() as u64;
    let transactions = transactions
        .txns()
        .map(|tx| ChainTransaction {
            hash: alloy_network_primitives::TransactionResponse::tx_hash(tx),
            from: alloy_network_primitives::TransactionResponse::from(tx),
            to: alloy_consensus::Transaction::to(tx),
            value: alloy_consensus::Transaction::value(tx),
        })
        .collect();

    ChainBlock {
        number,
        hash,
        parent_hash,
        timestamp,
        miner: beneficiary,
        extra_data,
        transaction_count,
        transactions,
    }
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    async fn is_connected(&self) -> bool {
        match self.provider.get_chain_id().await {
            Ok(chain_id) => {
                trace!(target: "chain_client", chain_id, "Node reachable");
                true
            }
            Err(err) => {
                debug!(target: "chain_client", %err, "Node unreachable");
                false
            }
        }
    }

    async fn block_number(&self) -> Result<u64, ChainClientError> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn get_block(
        &self,
        block: BlockRef,
        full: bool,
    ) -> Result<Option<ChainBlock>, ChainClientError> {
        let request = match block {
            BlockRef::Number(number) => {
                self.provider.get_block_by_number(BlockNumberOrTag::Number(number))
            }
            BlockRef::Latest => self.provider.get_block_by_number(BlockNumberOrTag::Latest),
            BlockRef::Hash(hash) => self.provider.get_block_by_hash(hash),
        };
        let request = if full { request.full() } else { request.hashes() };

        let block = request.await?;
        Ok(block.map(into_chain_block))
    }

    async fn get_balance(&self, address: Address) -> Result<U256, ChainClientError> {
        Ok(self.provider.get_balance(address).await?)
    }

    async fn get_transaction_count(&self, address: Address) -> Result<u64, ChainClientError> {
        Ok(self.provider.get_transaction_count(address).await?)
    }

    async fn new_heads(&self) -> Result<HeadStream, ChainClientError> {
        let poller = self.provider.watch_blocks().await?;
        let heads = poller
            .with_poll_interval(self.poll_interval)
            .into_stream()
            .flat_map(stream::iter)
            .map(Ok)
            .boxed();
        Ok(heads)
    }
}
