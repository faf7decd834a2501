//! Read-only access to chain data
//!
//! The pipelines only ever see the chain through [`ChainReader`], so the JSON-RPC
//! backend in [`crate::rpc`] can be swapped for any other source of blocks,
//! transactions and account state.

use std::time::Duration;

use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;

use crate::types::{ChainBlock, ChainTransaction};

/// Failure to read from the chain. Every variant is transient from the
/// pipelines' point of view: the same request is retried later.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed response: {0}")]
    Decode(String),

    /// The node has no block at a height below its reported head
    #[error("block {0} not available")]
    MissingBlock(u64),
}

/// Source of block, transaction and account data.
///
/// Ranges are half-open: `from` inclusive, `to` exclusive.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Current chain head height
    async fn chain_head(&self) -> Result<u64, ChainError>;

    /// Blocks with heights in `[from, to)`, ascending
    async fn blocks_in_range(&self, from: u64, to: u64) -> Result<Vec<ChainBlock>, ChainError>;

    /// Transactions included in blocks `[from, to)`
    async fn transactions_in_range(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<ChainTransaction>, ChainError>;

    /// Balance in base units at the given height
    async fn balance(&self, address: Address, block: u64) -> Result<U256, ChainError>;

    /// Deployed bytecode at the given height, empty for externally owned accounts
    async fn code(&self, address: Address, block: u64) -> Result<Bytes, ChainError>;

    /// A single block, `None` if the node does not know it
    async fn block(&self, number: u64) -> Result<Option<ChainBlock>, ChainError> {
        let blocks = self.blocks_in_range(number, number.saturating_add(1)).await?;
        Ok(blocks.into_iter().find(|b| b.number == number))
    }

    /// Node client identifier, used for logging
    async fn client_version(&self) -> Result<String, ChainError> {
        Ok("unknown".to_string())
    }
}
