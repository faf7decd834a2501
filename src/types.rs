//! Records produced by the indexing pipelines and the chain data they are built from.

use std::cmp::Ordering;
use std::fmt;

use alloy_primitives::{Address, U256};

/// Render an address in its canonical store form: lowercase, `0x`-prefixed hex.
pub fn normalize_address(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_slice()))
}

/// Classification of an address, derived from the presence of on-chain bytecode.
///
/// Variants are ordered by how much is known about the address. A stored
/// classification only ever moves up this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum AccountType {
    #[default]
    Unknown,
    ExternallyOwned,
    Contract,
}

impl AccountType {
    pub fn from_code(code: &[u8]) -> Self {
        if code.is_empty() {
            AccountType::ExternallyOwned
        } else {
            AccountType::Contract
        }
    }

    /// Merge a newly observed classification into a stored one.
    pub fn promote(self, observed: AccountType) -> Self {
        self.max(observed)
    }

    pub fn as_u8(self) -> u8 {
        match self {
            AccountType::Unknown => 0,
            AccountType::ExternallyOwned => 1,
            AccountType::Contract => 2,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => AccountType::ExternallyOwned,
            2 => AccountType::Contract,
            _ => AccountType::Unknown,
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccountType::Unknown => "unknown",
            AccountType::ExternallyOwned => "account",
            AccountType::Contract => "contract",
        };
        f.pad(name)
    }
}

/// Fixed-point balance: an integer amount of base units and the number of
/// decimals of the display unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Balance {
    base_units: U256,
    decimals: u8,
}

impl Balance {
    pub const fn from_base_units(base_units: U256, decimals: u8) -> Self {
        Self { base_units, decimals }
    }

    pub const fn zero(decimals: u8) -> Self {
        Self::from_base_units(U256::ZERO, decimals)
    }

    pub const fn base_units(&self) -> U256 {
        self.base_units
    }

    pub const fn decimals(&self) -> u8 {
        self.decimals
    }

    /// Whole display units and the remaining base units.
    pub fn split(&self) -> (U256, U256) {
        let scale = U256::from(10u64).pow(U256::from(self.decimals));
        (self.base_units / scale, self.base_units % scale)
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (whole, fraction) = self.split();
        if fraction.is_zero() {
            return write!(f, "{whole}");
        }
        let digits = format!("{:0>width$}", fraction.to_string(), width = self.decimals as usize);
        write!(f, "{whole}.{}", digits.trim_end_matches('0'))
    }
}

impl PartialOrd for Balance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Balance {
    fn cmp(&self, other: &Self) -> Ordering {
        self.base_units
            .cmp(&other.base_units)
            .then(self.decimals.cmp(&other.decimals))
    }
}

/// Latest known state of one address, keyed by `address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRecord {
    pub address: Address,
    pub account_type: AccountType,
    pub balance: Balance,
    pub last_scanned_block: u64,
}

impl AddressRecord {
    /// Combine the stored record with a newer observation of the same address.
    ///
    /// Balance and height are last-write-wins; the classification is only promoted.
    pub fn merged_with(&self, incoming: &AddressRecord) -> AddressRecord {
        AddressRecord {
            address: self.address,
            account_type: self.account_type.promote(incoming.account_type),
            balance: incoming.balance,
            last_scanned_block: incoming.last_scanned_block,
        }
    }
}

/// Sampled block statistics, keyed by `number`.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockStatRecord {
    pub number: u64,
    pub timestamp: u64,
    pub difficulty: U256,
    pub tx_count: u64,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub miner: Address,
    /// Seconds per block between this sample and the next higher one.
    pub block_time: f64,
    pub uncle_count: u64,
}

/// Block header fields read from the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBlock {
    pub number: u64,
    pub timestamp: u64,
    pub difficulty: U256,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub miner: Address,
    pub uncle_count: u64,
    pub tx_count: u64,
}

/// Participants of one transaction. `to` is `None` for contract creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub from: Address,
    pub to: Option<Address>,
    pub block_number: u64,
}
