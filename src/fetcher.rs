use std::sync::Arc;

use alloy_primitives::Address;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::chain::{ChainError, ChainReader};
use crate::types::{AccountType, AddressRecord, Balance};

/// Result of resolving one batch of addresses
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub records: Vec<AddressRecord>,
    /// Addresses whose lookups failed this time
    pub failed: Vec<Address>,
}

/// Resolves balance and classification for batches of addresses
pub struct BalanceFetcher {
    chain: Arc<dyn ChainReader>,
    chunk_size: usize,
    decimals: u8,
}

impl BalanceFetcher {
    pub fn new(chain: Arc<dyn ChainReader>, chunk_size: usize, decimals: u8) -> Self {
        Self {
            chain,
            chunk_size: chunk_size.max(1),
            decimals,
        }
    }

    /// Look up every address at height `at_block`
    ///
    /// Lookups run concurrently within a chunk of `chunk_size` addresses;
    /// chunks run one after another. A failed lookup only drops that address.
    pub async fn resolve(&self, addresses: &[Address], at_block: u64) -> FetchOutcome {
        let mut outcome = FetchOutcome::default();

        for chunk in addresses.chunks(self.chunk_size) {
            let lookups = chunk.iter().map(|address| self.resolve_one(*address, at_block));
            for (address, result) in chunk.iter().zip(join_all(lookups).await) {
                match result {
                    Ok(record) => outcome.records.push(record),
                    Err(e) => {
                        warn!(address = %address, error = %e, "Balance lookup failed");
                        outcome.failed.push(*address);
                    }
                }
            }
            debug!(chunk = chunk.len(), resolved = outcome.records.len(), "Resolved chunk");
        }

        outcome
    }

    async fn resolve_one(&self, address: Address, at_block: u64) -> Result<AddressRecord, ChainError> {
        let (code, balance) = tokio::try_join!(
            self.chain.code(address, at_block),
            self.chain.balance(address, at_block),
        )?;

        Ok(AddressRecord {
            address,
            account_type: AccountType::from_code(&code),
            balance: Balance::from_base_units(balance, self.decimals),
            last_scanned_block: at_block,
        })
    }
}
