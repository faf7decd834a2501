//! Persistence abstraction for indexed records
//!
//! [`AccountStore`] is implemented by the durable [`crate::redb_store::RedbStore`]
//! and the in-process [`crate::memory_store::MemoryStore`], so the pipelines can
//! hold either behind an `Arc<dyn AccountStore>`.

use std::sync::Arc;

use alloy_primitives::Address;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::types::{normalize_address, AddressRecord, BlockStatRecord};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A bulk insert hit a key that is already stored
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("record codec error: {0}")]
    Codec(String),
}

impl StoreError {
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StoreError::DuplicateKey(_))
    }

    pub fn duplicate_address(address: &Address) -> Self {
        StoreError::DuplicateKey(normalize_address(address))
    }
}

/// Unified store for account and block-stat records
#[async_trait]
pub trait AccountStore: Send + Sync {
    // ============================================================================
    // Accounts
    // ============================================================================

    /// Insert all records in one atomic write
    ///
    /// Fails with [`StoreError::DuplicateKey`] and writes nothing if any
    /// address is already stored or appears twice in `records`.
    async fn insert_accounts(&self, records: &[AddressRecord]) -> Result<(), StoreError>;

    /// Insert the record, or merge it into the stored one
    ///
    /// Merging keeps the higher classification and takes the incoming
    /// balance and height. Returns the stored result.
    async fn upsert_account(&self, record: &AddressRecord) -> Result<AddressRecord, StoreError>;

    async fn get_account(&self, address: &Address) -> Result<Option<AddressRecord>, StoreError>;

    async fn account_count(&self) -> Result<u64, StoreError>;

    /// Rich-list page: accounts by balance descending, address ascending on ties
    async fn top_accounts(&self, limit: usize, offset: usize) -> Result<Vec<AddressRecord>, StoreError>;

    // ============================================================================
    // Block statistics
    // ============================================================================

    /// Write the record unless its number is already stored. Returns whether
    /// it was written.
    async fn insert_block_stat(&self, record: &BlockStatRecord) -> Result<bool, StoreError>;

    /// Write the record, replacing any stored one
    async fn put_block_stat(&self, record: &BlockStatRecord) -> Result<(), StoreError>;

    async fn get_block_stat(&self, number: u64) -> Result<Option<BlockStatRecord>, StoreError>;

    /// Stored records with numbers in `[from, to)`, ascending
    async fn block_stats(&self, from: u64, to: u64) -> Result<Vec<BlockStatRecord>, StoreError>;

    // ============================================================================
    // Metadata
    // ============================================================================

    /// Head height of the last completed rich-list pass
    async fn last_scanned_head(&self) -> Result<Option<u64>, StoreError>;

    async fn set_last_scanned_head(&self, head: u64) -> Result<(), StoreError>;
}

/// Outcome of one [`UpsertSink::write`] call
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteReport {
    /// Records written through the bulk insert path
    pub inserted: usize,
    /// Records written through the per-record fallback
    pub upserted: usize,
    /// Batches whose bulk insert hit a duplicate key
    pub conflicting_batches: usize,
}

impl WriteReport {
    pub fn written(&self) -> usize {
        self.inserted + self.upserted
    }
}

/// Batched, idempotent account writer
///
/// Each batch first goes through the bulk insert. A duplicate key sends the
/// whole batch through per-record upserts instead; any other error is
/// returned as is.
pub struct UpsertSink {
    store: Arc<dyn AccountStore>,
    batch_size: usize,
}

impl UpsertSink {
    pub fn new(store: Arc<dyn AccountStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn write(&self, records: &[AddressRecord]) -> Result<WriteReport, StoreError> {
        let mut report = WriteReport::default();

        for batch in records.chunks(self.batch_size) {
            match self.store.insert_accounts(batch).await {
                Ok(()) => {
                    report.inserted += batch.len();
                    debug!(records = batch.len(), "Inserted account batch");
                }
                Err(e) if e.is_duplicate_key() => {
                    warn!(records = batch.len(), error = %e, "Bulk insert conflicted, upserting records individually");
                    report.conflicting_batches += 1;
                    for record in batch {
                        self.store.upsert_account(record).await?;
                        report.upserted += 1;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }
}

/// Shared ordering for rich-list pages
pub(crate) fn rich_list_order(a: &AddressRecord, b: &AddressRecord) -> std::cmp::Ordering {
    b.balance
        .base_units()
        .cmp(&a.balance.base_units())
        .then(a.address.cmp(&b.address))
}
