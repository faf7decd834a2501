//! Shared fixtures for integration tests: an in-memory chain

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use explorer_indexer::chain::{ChainError, ChainReader};
use explorer_indexer::types::{ChainBlock, ChainTransaction};

pub fn addr(n: u8) -> Address {
    Address::from([n; 20])
}

pub fn ether(n: u64) -> U256 {
    U256::from(n) * U256::from(10u64).pow(U256::from(18))
}

#[derive(Default)]
struct MockState {
    head: u64,
    blocks: BTreeMap<u64, ChainBlock>,
    txs: Vec<ChainTransaction>,
    balances: HashMap<Address, U256>,
    code: HashMap<Address, Bytes>,
    /// `None` fails forever, `Some(n)` fails the next `n` lookups
    failing_balances: HashMap<Address, Option<usize>>,
    failing_scans: usize,
    cancel_on_head: Option<(usize, CancellationToken)>,
    cancel_on_balance: Option<CancellationToken>,
}

/// Chain held entirely in memory. Blocks that were never added simply do
/// not exist.
#[derive(Default)]
pub struct MockChain {
    state: Mutex<MockState>,
    head_calls: AtomicUsize,
    balance_calls: AtomicUsize,
}

impl MockChain {
    pub fn new(head: u64) -> Self {
        let chain = Self::default();
        chain.state.lock().head = head;
        chain
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().head = head;
    }

    pub fn add_block(&self, number: u64, timestamp: u64, miner: Address) {
        let block = ChainBlock {
            number,
            timestamp,
            difficulty: U256::from(1_000_000u64 + number),
            gas_used: 21_000,
            gas_limit: 8_000_000,
            miner,
            uncle_count: 0,
            tx_count: 0,
        };
        self.state.lock().blocks.insert(number, block);
    }

    pub fn add_tx(&self, block_number: u64, from: Address, to: Option<Address>) {
        let mut state = self.state.lock();
        if let Some(block) = state.blocks.get_mut(&block_number) {
            block.tx_count += 1;
        }
        state.txs.push(ChainTransaction {
            from,
            to,
            block_number,
        });
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.state.lock().balances.insert(address, balance);
    }

    pub fn set_contract(&self, address: Address) {
        self.state
            .lock()
            .code
            .insert(address, Bytes::from_static(&[0x60, 0x80, 0x60, 0x40]));
    }

    pub fn clear_code(&self, address: Address) {
        self.state.lock().code.remove(&address);
    }

    pub fn fail_balance(&self, address: Address) {
        self.state.lock().failing_balances.insert(address, None);
    }

    pub fn fail_balance_times(&self, address: Address, times: usize) {
        self.state.lock().failing_balances.insert(address, Some(times));
    }

    pub fn fail_scans(&self, times: usize) {
        self.state.lock().failing_scans = times;
    }

    /// Cancel `token` on the `n`-th head query
    pub fn cancel_on_head_call(&self, n: usize, token: CancellationToken) {
        self.state.lock().cancel_on_head = Some((n, token));
    }

    /// Cancel `token` from inside the next balance lookup, while a batch is
    /// being resolved
    pub fn cancel_on_balance_call(&self, token: CancellationToken) {
        self.state.lock().cancel_on_balance = Some(token);
    }

    pub fn head_calls(&self) -> usize {
        self.head_calls.load(Ordering::SeqCst)
    }

    pub fn balance_calls(&self) -> usize {
        self.balance_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn chain_head(&self) -> Result<u64, ChainError> {
        let calls = self.head_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let state = self.state.lock();
        if let Some((n, token)) = &state.cancel_on_head {
            if calls >= *n {
                token.cancel();
            }
        }
        Ok(state.head)
    }

    async fn blocks_in_range(&self, from: u64, to: u64) -> Result<Vec<ChainBlock>, ChainError> {
        if from >= to {
            return Ok(Vec::new());
        }
        let state = self.state.lock();
        Ok(state.blocks.range(from..to).map(|(_, b)| b.clone()).collect())
    }

    async fn transactions_in_range(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<ChainTransaction>, ChainError> {
        let mut state = self.state.lock();
        if state.failing_scans > 0 {
            state.failing_scans -= 1;
            return Err(ChainError::Transport("connection reset".into()));
        }
        Ok(state
            .txs
            .iter()
            .filter(|tx| tx.block_number >= from && tx.block_number < to)
            .cloned()
            .collect())
    }

    async fn balance(&self, address: Address, _block: u64) -> Result<U256, ChainError> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if let Some(token) = state.cancel_on_balance.take() {
            token.cancel();
        }
        match state.failing_balances.get_mut(&address) {
            Some(None) => {
                return Err(ChainError::Rpc {
                    code: -32000,
                    message: "missing trie node".into(),
                })
            }
            Some(Some(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                return Err(ChainError::Timeout(std::time::Duration::from_secs(30)));
            }
            _ => {}
        }
        Ok(state.balances.get(&address).copied().unwrap_or_default())
    }

    async fn code(&self, address: Address, _block: u64) -> Result<Bytes, ChainError> {
        Ok(self.state.lock().code.get(&address).cloned().unwrap_or_default())
    }
}
