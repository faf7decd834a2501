use std::fmt::Display;
use std::path::Path;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::store::{rich_list_order, AccountStore, StoreError};
use crate::types::{AccountType, AddressRecord, Balance, BlockStatRecord};

// Table definitions
const ACCOUNTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("accounts");
const BLOCK_STATS: TableDefinition<u64, &[u8]> = TableDefinition::new("block_stats");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const META_LAST_SCANNED_HEAD: &str = "last_scanned_head";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredAccount {
    account_type: u8,
    balance: [u8; 32], // U256 as bytes
    decimals: u8,
    last_scanned_block: u64,
}

impl StoredAccount {
    fn from_record(record: &AddressRecord) -> Self {
        Self {
            account_type: record.account_type.as_u8(),
            balance: record.balance.base_units().to_be_bytes(),
            decimals: record.balance.decimals(),
            last_scanned_block: record.last_scanned_block,
        }
    }

    fn into_record(self, address: Address) -> AddressRecord {
        AddressRecord {
            address,
            account_type: AccountType::from_u8(self.account_type),
            balance: Balance::from_base_units(U256::from_be_bytes(self.balance), self.decimals),
            last_scanned_block: self.last_scanned_block,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredBlockStat {
    timestamp: u64,
    difficulty: [u8; 32],
    tx_count: u64,
    gas_used: u64,
    gas_limit: u64,
    miner: [u8; 20],
    block_time: f64,
    uncle_count: u64,
}

impl StoredBlockStat {
    fn from_record(record: &BlockStatRecord) -> Self {
        Self {
            timestamp: record.timestamp,
            difficulty: record.difficulty.to_be_bytes(),
            tx_count: record.tx_count,
            gas_used: record.gas_used,
            gas_limit: record.gas_limit,
            miner: record.miner.0 .0,
            block_time: record.block_time,
            uncle_count: record.uncle_count,
        }
    }

    fn into_record(self, number: u64) -> BlockStatRecord {
        BlockStatRecord {
            number,
            timestamp: self.timestamp,
            difficulty: U256::from_be_bytes(self.difficulty),
            tx_count: self.tx_count,
            gas_used: self.gas_used,
            gas_limit: self.gas_limit,
            miner: Address::from(self.miner),
            block_time: self.block_time,
            uncle_count: self.uncle_count,
        }
    }
}

fn backend(e: impl Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serialize(value).map_err(|e| StoreError::Codec(e.to_string()))
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, StoreError> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Codec(e.to_string()))
}

/// Durable [`AccountStore`] in a single redb file
///
/// Every write is one redb write transaction, so readers in other handles
/// only ever see whole batches.
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open the database at `path`, creating the file and tables if needed
    pub fn create(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(backend)?;

        // Create tables
        let write_txn = db.begin_write().map_err(backend)?;
        {
            let _ = write_txn.open_table(ACCOUNTS).map_err(backend)?;
            let _ = write_txn.open_table(BLOCK_STATS).map_err(backend)?;
            let _ = write_txn.open_table(META).map_err(backend)?;
        }
        write_txn.commit().map_err(backend)?;

        Ok(Self { db })
    }

    /// Open an existing database
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::open(path).map_err(backend)?;
        Ok(Self { db })
    }

    fn read_accounts(&self) -> Result<Vec<AddressRecord>, StoreError> {
        let read_txn = self.db.begin_read().map_err(backend)?;
        let table = read_txn.open_table(ACCOUNTS).map_err(backend)?;

        let mut records = Vec::new();
        for entry in table.iter().map_err(backend)? {
            let (key, value) = entry.map_err(backend)?;
            let address = Address::from_slice(key.value());
            let stored: StoredAccount = decode(value.value())?;
            records.push(stored.into_record(address));
        }
        Ok(records)
    }
}

#[async_trait]
impl AccountStore for RedbStore {
    async fn insert_accounts(&self, records: &[AddressRecord]) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write().map_err(backend)?;

        let conflict = {
            let mut table = write_txn.open_table(ACCOUNTS).map_err(backend)?;
            let mut conflict = None;
            for record in records {
                let exists = table.get(record.address.as_slice()).map_err(backend)?.is_some();
                if exists {
                    conflict = Some(record.address);
                    break;
                }
                let bytes = encode(&StoredAccount::from_record(record))?;
                table
                    .insert(record.address.as_slice(), bytes.as_slice())
                    .map_err(backend)?;
            }
            conflict
        };

        if let Some(address) = conflict {
            write_txn.abort().map_err(backend)?;
            return Err(StoreError::duplicate_address(&address));
        }

        write_txn.commit().map_err(backend)?;
        Ok(())
    }

    async fn upsert_account(&self, record: &AddressRecord) -> Result<AddressRecord, StoreError> {
        let write_txn = self.db.begin_write().map_err(backend)?;

        let stored = {
            let mut table = write_txn.open_table(ACCOUNTS).map_err(backend)?;
            let existing = match table.get(record.address.as_slice()).map_err(backend)? {
                Some(value) => Some(decode::<StoredAccount>(value.value())?),
                None => None,
            };

            let merged = match existing {
                Some(existing) => existing.into_record(record.address).merged_with(record),
                None => record.clone(),
            };

            let bytes = encode(&StoredAccount::from_record(&merged))?;
            table
                .insert(record.address.as_slice(), bytes.as_slice())
                .map_err(backend)?;
            merged
        };

        write_txn.commit().map_err(backend)?;
        Ok(stored)
    }

    async fn get_account(&self, address: &Address) -> Result<Option<AddressRecord>, StoreError> {
        let read_txn = self.db.begin_read().map_err(backend)?;
        let table = read_txn.open_table(ACCOUNTS).map_err(backend)?;

        match table.get(address.as_slice()).map_err(backend)? {
            Some(value) => {
                let stored: StoredAccount = decode(value.value())?;
                Ok(Some(stored.into_record(*address)))
            }
            None => Ok(None),
        }
    }

    async fn account_count(&self) -> Result<u64, StoreError> {
        let read_txn = self.db.begin_read().map_err(backend)?;
        let table = read_txn.open_table(ACCOUNTS).map_err(backend)?;

        let mut count = 0u64;
        for entry in table.iter().map_err(backend)? {
            entry.map_err(backend)?;
            count += 1;
        }
        Ok(count)
    }

    async fn top_accounts(&self, limit: usize, offset: usize) -> Result<Vec<AddressRecord>, StoreError> {
        let mut accounts = self.read_accounts()?;
        accounts.sort_by(rich_list_order);
        Ok(accounts.into_iter().skip(offset).take(limit).collect())
    }

    async fn insert_block_stat(&self, record: &BlockStatRecord) -> Result<bool, StoreError> {
        let write_txn = self.db.begin_write().map_err(backend)?;

        let written = {
            let mut table = write_txn.open_table(BLOCK_STATS).map_err(backend)?;
            let exists = table.get(record.number).map_err(backend)?.is_some();
            if !exists {
                let bytes = encode(&StoredBlockStat::from_record(record))?;
                table.insert(record.number, bytes.as_slice()).map_err(backend)?;
            }
            !exists
        };

        if written {
            write_txn.commit().map_err(backend)?;
        } else {
            write_txn.abort().map_err(backend)?;
        }
        Ok(written)
    }

    async fn put_block_stat(&self, record: &BlockStatRecord) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write().map_err(backend)?;
        {
            let mut table = write_txn.open_table(BLOCK_STATS).map_err(backend)?;
            let bytes = encode(&StoredBlockStat::from_record(record))?;
            table.insert(record.number, bytes.as_slice()).map_err(backend)?;
        }
        write_txn.commit().map_err(backend)?;
        Ok(())
    }

    async fn get_block_stat(&self, number: u64) -> Result<Option<BlockStatRecord>, StoreError> {
        let read_txn = self.db.begin_read().map_err(backend)?;
        let table = read_txn.open_table(BLOCK_STATS).map_err(backend)?;

        match table.get(number).map_err(backend)? {
            Some(value) => {
                let stored: StoredBlockStat = decode(value.value())?;
                Ok(Some(stored.into_record(number)))
            }
            None => Ok(None),
        }
    }

    async fn block_stats(&self, from: u64, to: u64) -> Result<Vec<BlockStatRecord>, StoreError> {
        if from >= to {
            return Ok(Vec::new());
        }

        let read_txn = self.db.begin_read().map_err(backend)?;
        let table = read_txn.open_table(BLOCK_STATS).map_err(backend)?;

        let mut records = Vec::new();
        for entry in table.range(from..to).map_err(backend)? {
            let (key, value) = entry.map_err(backend)?;
            let stored: StoredBlockStat = decode(value.value())?;
            records.push(stored.into_record(key.value()));
        }
        Ok(records)
    }

    async fn last_scanned_head(&self) -> Result<Option<u64>, StoreError> {
        let read_txn = self.db.begin_read().map_err(backend)?;
        let table = read_txn.open_table(META).map_err(backend)?;

        match table.get(META_LAST_SCANNED_HEAD).map_err(backend)? {
            Some(value) => Ok(Some(value.value())),
            None => Ok(None),
        }
    }

    async fn set_last_scanned_head(&self, head: u64) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write().map_err(backend)?;
        {
            let mut table = write_txn.open_table(META).map_err(backend)?;
            table.insert(META_LAST_SCANNED_HEAD, head).map_err(backend)?;
        }
        write_txn.commit().map_err(backend)?;
        Ok(())
    }
}
