use std::collections::{BTreeMap, HashSet};

use alloy_primitives::Address;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::store::{rich_list_order, AccountStore, StoreError};
use crate::types::{AddressRecord, BlockStatRecord};

#[derive(Debug, Default)]
struct Inner {
    accounts: BTreeMap<Address, AddressRecord>,
    block_stats: BTreeMap<u64, BlockStatRecord>,
    last_scanned_head: Option<u64>,
}

/// In-process [`AccountStore`], for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn insert_accounts(&self, records: &[AddressRecord]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();

        let mut seen = HashSet::with_capacity(records.len());
        for record in records {
            if inner.accounts.contains_key(&record.address) || !seen.insert(record.address) {
                return Err(StoreError::duplicate_address(&record.address));
            }
        }

        for record in records {
            inner.accounts.insert(record.address, record.clone());
        }
        Ok(())
    }

    async fn upsert_account(&self, record: &AddressRecord) -> Result<AddressRecord, StoreError> {
        let mut inner = self.inner.lock();
        let stored = match inner.accounts.get(&record.address) {
            Some(existing) => existing.merged_with(record),
            None => record.clone(),
        };
        inner.accounts.insert(record.address, stored.clone());
        Ok(stored)
    }

    async fn get_account(&self, address: &Address) -> Result<Option<AddressRecord>, StoreError> {
        Ok(self.inner.lock().accounts.get(address).cloned())
    }

    async fn account_count(&self) -> Result<u64, StoreError> {
        Ok(self.inner.lock().accounts.len() as u64)
    }

    async fn top_accounts(&self, limit: usize, offset: usize) -> Result<Vec<AddressRecord>, StoreError> {
        let mut accounts: Vec<AddressRecord> = self.inner.lock().accounts.values().cloned().collect();
        accounts.sort_by(rich_list_order);
        Ok(accounts.into_iter().skip(offset).take(limit).collect())
    }

    async fn insert_block_stat(&self, record: &BlockStatRecord) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        if inner.block_stats.contains_key(&record.number) {
            return Ok(false);
        }
        inner.block_stats.insert(record.number, record.clone());
        Ok(true)
    }

    async fn put_block_stat(&self, record: &BlockStatRecord) -> Result<(), StoreError> {
        self.inner.lock().block_stats.insert(record.number, record.clone());
        Ok(())
    }

    async fn get_block_stat(&self, number: u64) -> Result<Option<BlockStatRecord>, StoreError> {
        Ok(self.inner.lock().block_stats.get(&number).cloned())
    }

    async fn block_stats(&self, from: u64, to: u64) -> Result<Vec<BlockStatRecord>, StoreError> {
        if from >= to {
            return Ok(Vec::new());
        }
        Ok(self
            .inner
            .lock()
            .block_stats
            .range(from..to)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn last_scanned_head(&self) -> Result<Option<u64>, StoreError> {
        Ok(self.inner.lock().last_scanned_head)
    }

    async fn set_last_scanned_head(&self, head: u64) -> Result<(), StoreError> {
        self.inner.lock().last_scanned_head = Some(head);
        Ok(())
    }
}
