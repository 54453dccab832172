//! Deterministic in-memory upstream chain for tests.

use crate::{BlockRef, ChainBlock, ChainClient, ChainClientError, ChainTransaction, HeadStream};
use alloy_primitives::{Address, B256, Bytes, U256};
use async_trait::async_trait;
use futures::{StreamExt, stream};
use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard, PoisonError},
};

/// Parent hash presented by every block once linkage is broken.
const BROKEN_PARENT: B256 = B256::repeat_byte(0xee);

#[derive(Debug)]
struct ChainState {
    blocks: Vec<ChainBlock>,
    transactions_per_block: usize,
    balances: HashMap<Address, (U256, u64)>,
    connected: bool,
    head_filters: bool,
    broken_linkage: bool,
    block_requests: usize,
    malformed: HashSet<u64>,
    misnumbered: HashSet<u64>,
    announce_every_block: bool,
}

impl ChainState {
    fn present(&self, block: &ChainBlock) -> ChainBlock {
        let mut block = block.clone();
        if self.broken_linkage {
            block.hash.0[0] ^= 0xff;
            block.parent_hash = BROKEN_PARENT;
        }
        block
    }

    fn block_by_number(&self, number: u64) -> Result<Option<ChainBlock>, ChainClientError> {
        if self.malformed.contains(&number) {
            return Err(ChainClientError::Malformed(format!("undecodable block {number}")));
        }
        let served = if self.misnumbered.contains(&number) {
            number.checked_sub(1).unwrap_or(number + 1)
        } else {
            number
        };
        Ok(self.blocks.get(served as usize).map(|b| self.present(b)))
    }

    fn ensure_connected(&self) -> Result<(), ChainClientError> {
        if self.connected {
            Ok(())
        } else {
            Err(ChainClientError::Disconnected("test chain offline".to_string()))
        }
    }
}

/// A [`ChainClient`] serving a linear chain built from deterministic hashes.
///
/// Blocks are identified by `(number, fork)`; [`TestChain::reorg_from`]
/// replaces a suffix of the chain with blocks of another fork.
#[derive(Debug)]
pub struct TestChain {
    state: Mutex<ChainState>,
}

impl TestChain {
    /// Creates a chain with heights `0..=tip`, each carrying `transactions`
    /// transactions.
    pub fn new(tip: u64, transactions: usize) -> Self {
        let mut blocks: Vec<ChainBlock> = Vec::new();
        for number in 0..=tip {
            let parent = blocks.last().map(|b| b.hash).unwrap_or_default();
            blocks.push(Self::make_block(number, 0, parent, transactions));
        }
        Self {
            state: Mutex::new(ChainState {
                blocks,
                transactions_per_block: transactions,
                balances: HashMap::new(),
                connected: true,
                head_filters: true,
                broken_linkage: false,
                block_requests: 0,
                malformed: HashSet::new(),
                misnumbered: HashSet::new(),
                announce_every_block: false,
            }),
        }
    }

    /// Builds the block at `number` on `fork`.
    pub fn make_block(number: u64, fork: u8, parent_hash: B256, transactions: usize) -> ChainBlock {
        let transaction_count = transactions as u64;
        let mut hash = B256::ZERO;
        hash.0[0] = 0xb0;
        hash.0[1] = fork;
        hash.0[24..].copy_from_slice(&number.to_be_bytes());

        let transactions = (0..transaction_count)
            .map(|index| {
                let mut tx_hash = B256::ZERO;
                tx_hash.0[0] = 0x70;
                tx_hash.0[1] = fork;
                tx_hash.0[16..24].copy_from_slice(&number.to_be_bytes());
                tx_hash.0[24..].copy_from_slice(&index.to_be_bytes());
                ChainTransaction {
                    hash: tx_hash,
                    from: Self::sender(number, index),
                    to: (index % 2 == 0).then(|| Self::recipient(number, index)),
                    value: U256::from(index + 1) * U256::from(10u64).pow(U256::from(18u64)),
                }
            })
            .collect();

        ChainBlock {
            number,
            hash,
            parent_hash,
            timestamp: Self::timestamp(number),
            miner: Self::miner(number),
            extra_data: Bytes::from(vec![fork]),
            transaction_count,
            transactions,
        }
    }

    /// Timestamp of the block at `number`.
    pub const fn timestamp(number: u64) -> u64 {
        1_000 + number * 12
    }

    /// Miner of the block at `number`.
    pub fn miner(number: u64) -> Address {
        Self::address(0xaa, number, 0)
    }

    /// Sender of transaction `index` of the block at `number`.
    pub fn sender(number: u64, index: u64) -> Address {
        Self::address(0xf0, number, index)
    }

    /// Recipient of transaction `index` of the block at `number`. Odd indices
    /// create contracts and have none.
    pub fn recipient(number: u64, index: u64) -> Address {
        Self::address(0x70, number, index)
    }

    fn address(tag: u8, number: u64, index: u64) -> Address {
        let mut address = Address::ZERO;
        address.0[0] = tag;
        address.0[4..12].copy_from_slice(&number.to_be_bytes());
        address.0[12..].copy_from_slice(&index.to_be_bytes());
        address
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Height of the head.
    pub fn tip(&self) -> u64 {
        self.lock().blocks.len() as u64 - 1
    }

    /// The block at `number` as the chain currently serves it.
    pub fn block_at(&self, number: u64) -> Option<ChainBlock> {
        let state = self.lock();
        state.blocks.get(number as usize).map(|block| state.present(block))
    }

    /// Appends `count` blocks on the fork of the current head.
    pub fn extend(&self, count: u64) {
        let mut state = self.lock();
        for _ in 0..count {
            let Some(head) = state.blocks.last() else { return };
            let block = Self::make_block(
                head.number + 1,
                head.hash.0[1],
                head.hash,
                state.transactions_per_block,
            );
            state.blocks.push(block);
        }
    }

    /// Replaces heights `height..=tip` with blocks of `fork`.
    pub fn reorg_from(&self, height: u64, fork: u8) {
        let mut state = self.lock();
        let transactions = state.transactions_per_block;
        for number in height..state.blocks.len() as u64 {
            let parent = number
                .checked_sub(1)
                .map(|p| state.blocks[p as usize].hash)
                .unwrap_or_default();
            state.blocks[number as usize] = Self::make_block(number, fork, parent, transactions);
        }
    }

    /// Makes every served block carry a parent hash that matches nothing.
    pub fn break_linkage(&self) {
        self.lock().broken_linkage = true;
    }

    /// Simulates the node going offline or coming back.
    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }

    /// Makes [`ChainClient::new_heads`] report the capability as unsupported.
    pub fn disable_head_filters(&self) {
        self.lock().head_filters = false;
    }

    /// Sets the balance and transaction count of `address`.
    pub fn set_account(&self, address: Address, balance: U256, nonce: u64) {
        self.lock().balances.insert(address, (balance, nonce));
    }

    /// Makes requests for the block at `number` fail as undecodable.
    pub fn serve_malformed(&self, number: u64) {
        self.lock().malformed.insert(number);
    }

    /// Makes requests for the block at `number` return a neighbouring block.
    pub fn serve_wrong_number(&self, number: u64) {
        self.lock().misnumbered.insert(number);
    }

    /// Serves every height correctly again.
    pub fn clear_faults(&self) {
        let mut state = self.lock();
        state.malformed.clear();
        state.misnumbered.clear();
    }

    /// Makes [`ChainClient::new_heads`] announce every block in ascending
    /// order at once and then stay open.
    pub fn announce_every_block(&self) {
        self.lock().announce_every_block = true;
    }

    /// Number of block requests served so far.
    pub fn block_requests(&self) -> usize {
        self.lock().block_requests
    }
}

#[async_trait]
impl ChainClient for TestChain {
    async fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn block_number(&self) -> Result<u64, ChainClientError> {
        self.lock().ensure_connected()?;
        Ok(self.tip())
    }

    async fn get_block(
        &self,
        block: BlockRef,
        full: bool,
    ) -> Result<Option<ChainBlock>, ChainClientError> {
        let mut state = self.lock();
        state.ensure_connected()?;
        state.block_requests += 1;

        let found = match block {
            BlockRef::Number(number) => state.block_by_number(number)?,
            BlockRef::Latest => state.blocks.last().map(|b| state.present(b)),
            BlockRef::Hash(hash) => {
                state.blocks.iter().map(|b| state.present(b)).find(|b| b.hash == hash)
            }
        };
        Ok(found.map(|mut block| {
            if !full {
                block.transactions.clear();
            }
            block
        }))
    }

    async fn get_balance(&self, address: Address) -> Result<U256, ChainClientError> {
        let state = self.lock();
        state.ensure_connected()?;
        Ok(state.balances.get(&address).map(|(balance, _)| *balance).unwrap_or_default())
    }

    async fn get_transaction_count(&self, address: Address) -> Result<u64, ChainClientError> {
        let state = self.lock();
        state.ensure_connected()?;
        Ok(state.balances.get(&address).map(|(_, nonce)| *nonce).unwrap_or_default())
    }

    /// Yields the current head once, then ends, unless every block is
    /// announced.
    async fn new_heads(&self) -> Result<HeadStream, ChainClientError> {
        let state = self.lock();
        state.ensure_connected()?;
        if !state.head_filters {
            return Err(ChainClientError::Unsupported("eth_newBlockFilter".to_string()));
        }
        if state.announce_every_block {
            let hashes: Vec<_> = state.blocks.iter().map(|b| Ok(state.present(b).hash)).collect();
            return Ok(stream::iter(hashes).chain(stream::pending()).boxed());
        }
        let head = state.blocks.last().map(|b| state.present(b).hash);
        Ok(stream::iter(head.map(Ok)).boxed())
    }
}
