//! Explorer indexer - incremental rich-list and block statistics for EVM chains
//!
//! Walks the chain from the head down in fixed-size windows, collects every
//! address that took part in a block, resolves balances and account types in
//! batches and keeps them in a local redb database. A second pipeline samples
//! block headers into per-block statistics.

pub mod app;
pub mod cache;
pub mod chain;
pub mod config;
pub mod driver;
pub mod fetcher;
pub mod memory_store;
pub mod redb_store;
pub mod retry;
pub mod rpc;
pub mod scanner;
pub mod stats;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use cache::AddressCache;
pub use chain::{ChainError, ChainReader};
pub use config::{Config, ConfigError, RescanSpec};
pub use driver::{Driver, DriverConfig, DriverReport, DriverState, RunMode};
pub use memory_store::MemoryStore;
pub use redb_store::RedbStore;
pub use stats::{StatsMode, StatsPipeline, StatsReport};
pub use store::{AccountStore, StoreError, UpsertSink, WriteReport};
pub use types::{AccountType, AddressRecord, Balance, BlockStatRecord};
