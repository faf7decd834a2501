//! Integration tests for the rich-list pipeline: scanner, fetcher and driver
//! running against an in-memory chain and store

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::U256;
use tokio_util::sync::CancellationToken;

use common::{addr, ether, MockChain};
use explorer_indexer::driver::{Driver, DriverConfig, DriverState, RunMode};
use explorer_indexer::fetcher::BalanceFetcher;
use explorer_indexer::memory_store::MemoryStore;
use explorer_indexer::scanner::{ScanWindow, WindowScanner};
use explorer_indexer::store::AccountStore;
use explorer_indexer::types::AccountType;

fn fast_config() -> DriverConfig {
    DriverConfig {
        scan_delay: Duration::ZERO,
        retry_delay: Duration::from_millis(1),
        poll_interval: Duration::ZERO,
        ..DriverConfig::default()
    }
}

/// A, B, C transact inside [1000, 1500); D mines block 1300 and is a contract
fn scenario_chain() -> MockChain {
    let chain = MockChain::new(1500);
    chain.add_tx(1200, addr(0xA), Some(addr(0xB)));
    chain.add_tx(1400, addr(0xB), Some(addr(0xC)));
    chain.add_block(1300, 1_600_000_000, addr(0xD));

    chain.set_balance(addr(0xA), ether(5));
    chain.set_balance(addr(0xB), ether(12));
    chain.set_balance(addr(0xC), U256::from(1u64));
    chain.set_balance(addr(0xD), ether(12));
    chain.set_contract(addr(0xD));
    chain
}

// ============================================================================
// WindowScanner / BalanceFetcher
// ============================================================================

#[tokio::test]
async fn test_scanner_collects_senders_receivers_and_miners() {
    let chain = Arc::new(scenario_chain());
    let scanner = WindowScanner::new(chain);

    let window = ScanWindow::new(1000, 1500).unwrap();
    let addresses = scanner.scan(window).await.unwrap();

    let expected: BTreeSet<_> = [addr(0xA), addr(0xB), addr(0xC), addr(0xD)].into_iter().collect();
    assert_eq!(addresses, expected);

    // Nothing happened below the window
    let below = scanner.scan(ScanWindow::new(500, 1000).unwrap()).await.unwrap();
    assert!(below.is_empty());
}

#[tokio::test]
async fn test_contract_creation_contributes_sender_only() {
    let chain = Arc::new(MockChain::new(10));
    chain.add_tx(5, addr(1), None);
    let scanner = WindowScanner::new(chain);

    let addresses = scanner.scan(ScanWindow::new(0, 10).unwrap()).await.unwrap();
    assert_eq!(addresses.into_iter().collect::<Vec<_>>(), vec![addr(1)]);
}

#[tokio::test]
async fn test_fetcher_skips_failed_lookup() {
    let chain = Arc::new(MockChain::new(100));
    let batch: Vec<_> = (1..=5).map(addr).collect();
    for (i, a) in batch.iter().enumerate() {
        chain.set_balance(*a, U256::from(i as u64 + 1));
    }
    chain.fail_balance(addr(3));

    let fetcher = BalanceFetcher::new(chain, 2, 18);
    let outcome = fetcher.resolve(&batch, 100).await;

    assert_eq!(outcome.records.len(), 4);
    assert_eq!(outcome.failed, vec![addr(3)]);
    assert!(outcome.records.iter().all(|r| r.address != addr(3)));
    assert!(outcome.records.iter().all(|r| r.last_scanned_block == 100));

    let four = outcome.records.iter().find(|r| r.address == addr(4)).unwrap();
    assert_eq!(four.balance.base_units(), U256::from(4u64));
    assert_eq!(four.account_type, AccountType::ExternallyOwned);
}

// ============================================================================
// Driver
// ============================================================================

#[tokio::test]
async fn test_bounded_run_indexes_every_participant() {
    let chain = Arc::new(scenario_chain());
    let store = Arc::new(MemoryStore::new());

    let mut driver = Driver::new(chain, store.clone(), fast_config(), CancellationToken::new());
    let report = driver.run(RunMode::Bounded { floor: 0 }).await.unwrap();

    assert_eq!(driver.state(), DriverState::Done);
    assert_eq!(report.passes, 1);
    assert_eq!(report.windows_scanned, 3);
    assert_eq!(report.records_written, 4);
    assert_eq!(report.failed_lookups, 0);
    assert_eq!(store.account_count().await.unwrap(), 4);
    assert_eq!(store.last_scanned_head().await.unwrap(), Some(1500));

    // Balance descending, address ascending on ties
    let top = store.top_accounts(10, 0).await.unwrap();
    let order: Vec<_> = top.iter().map(|r| r.address).collect();
    assert_eq!(order, vec![addr(0xB), addr(0xD), addr(0xA), addr(0xC)]);

    let miner = store.get_account(&addr(0xD)).await.unwrap().unwrap();
    assert_eq!(miner.account_type, AccountType::Contract);
    assert_eq!(miner.balance.to_string(), "12");
    assert_eq!(miner.last_scanned_block, 1500);
}

#[tokio::test]
async fn test_small_batches_with_eviction_and_conflicts() {
    let chain = Arc::new(MockChain::new(400));
    chain.add_tx(350, addr(1), Some(addr(2)));
    chain.add_tx(250, addr(1), Some(addr(3)));
    chain.add_tx(150, addr(1), Some(addr(4)));
    // addr(2) is evicted by then, so it is resolved and written a second time
    chain.add_tx(50, addr(5), Some(addr(2)));

    let store = Arc::new(MemoryStore::new());
    let config = DriverConfig {
        window_size: 100,
        batch_threshold: 1,
        cache_max_size: 2,
        reduce_factor: 0.5,
        ..fast_config()
    };

    let mut driver = Driver::new(chain, store.clone(), config, CancellationToken::new());
    let report = driver.run(RunMode::Bounded { floor: 0 }).await.unwrap();

    assert_eq!(report.windows_scanned, 4);
    assert_eq!(store.account_count().await.unwrap(), 5);
    assert_eq!(report.records_written, 6);
    assert_eq!(report.conflicting_batches, 1);
    assert!(report.evicted >= 2);
    assert!(driver.cache().len() <= 2);
    assert_eq!(driver.cache().pending_len(), 0);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let chain = Arc::new(scenario_chain());
    chain.fail_scans(2);
    chain.fail_balance_times(addr(0xA), 1);
    let store = Arc::new(MemoryStore::new());

    let mut driver = Driver::new(chain, store.clone(), fast_config(), CancellationToken::new());
    let report = driver.run(RunMode::Bounded { floor: 0 }).await.unwrap();

    assert_eq!(report.failed_lookups, 1);
    assert_eq!(report.records_written, 4);
    assert_eq!(store.account_count().await.unwrap(), 4);

    let a = store.get_account(&addr(0xA)).await.unwrap().unwrap();
    assert_eq!(a.balance.base_units(), ether(5));
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let chain = Arc::new(scenario_chain());
    let store = Arc::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut driver = Driver::new(chain, store.clone(), fast_config(), cancel);
    let report = driver.run(RunMode::Bounded { floor: 0 }).await.unwrap();

    assert_eq!(report.passes, 0);
    assert_eq!(report.windows_scanned, 0);
    assert_eq!(store.account_count().await.unwrap(), 0);
    assert_eq!(store.last_scanned_head().await.unwrap(), None);
}

#[tokio::test]
async fn test_continuous_mode_resumes_from_last_head() {
    let chain = Arc::new(scenario_chain());
    let store = Arc::new(MemoryStore::new());

    // First run: catch up to 1500, stop at the next head poll
    let cancel = CancellationToken::new();
    chain.cancel_on_head_call(2, cancel.clone());
    let mut driver = Driver::new(chain.clone(), store.clone(), fast_config(), cancel);
    let report = driver.run(RunMode::Continuous { floor: 0 }).await.unwrap();

    assert_eq!(report.passes, 1);
    assert_eq!(store.account_count().await.unwrap(), 4);
    assert_eq!(store.last_scanned_head().await.unwrap(), Some(1500));

    // The chain moves on; a new run only scans the new blocks
    chain.set_head(2000);
    chain.add_tx(1700, addr(0xE), Some(addr(0xF)));
    let cancel = CancellationToken::new();
    chain.cancel_on_head_call(chain.head_calls() + 2, cancel.clone());

    let mut driver = Driver::new(chain.clone(), store.clone(), fast_config(), cancel);
    let report = driver.run(RunMode::Continuous { floor: 0 }).await.unwrap();

    assert_eq!(report.passes, 1);
    assert_eq!(report.windows_scanned, 1);
    assert_eq!(report.records_written, 2);
    assert_eq!(driver.state(), DriverState::Waiting);
    assert_eq!(store.account_count().await.unwrap(), 6);
    assert_eq!(store.last_scanned_head().await.unwrap(), Some(2000));
}

#[tokio::test]
async fn test_cancel_while_resolving_finishes_batch() {
    let chain = Arc::new(scenario_chain());
    let store = Arc::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    chain.cancel_on_balance_call(cancel.clone());

    let config = DriverConfig {
        window_size: 500,
        batch_threshold: 1,
        ..fast_config()
    };
    let mut driver = Driver::new(chain, store.clone(), config, cancel.clone());
    let report = driver.run(RunMode::Bounded { floor: 0 }).await.unwrap();

    assert!(cancel.is_cancelled());
    // The batch from [1000, 1500) is resolved and written, then the pass stops
    assert_eq!(report.windows_scanned, 1);
    assert_eq!(report.records_written, 4);
    assert_eq!(report.passes, 0);
    assert_eq!(store.account_count().await.unwrap(), 4);
    assert_eq!(driver.cache().pending_len(), 0);

    // [0, 1000) was never scanned
    assert_eq!(store.last_scanned_head().await.unwrap(), None);
}

#[tokio::test]
async fn test_bounded_floor_does_not_mark_lower_blocks_scanned() {
    let chain = Arc::new(scenario_chain());
    chain.add_tx(500, addr(0x5), Some(addr(0x6)));
    let store = Arc::new(MemoryStore::new());

    let mut driver = Driver::new(chain.clone(), store.clone(), fast_config(), CancellationToken::new());
    let report = driver.run(RunMode::Bounded { floor: 1000 }).await.unwrap();

    assert_eq!(report.passes, 1);
    assert_eq!(store.account_count().await.unwrap(), 4);
    assert_eq!(store.last_scanned_head().await.unwrap(), None);

    // A later continuous run from genesis still covers [0, 1000)
    let cancel = CancellationToken::new();
    chain.cancel_on_head_call(chain.head_calls() + 2, cancel.clone());
    let mut driver = Driver::new(chain.clone(), store.clone(), fast_config(), cancel);
    let report = driver.run(RunMode::Continuous { floor: 0 }).await.unwrap();

    assert_eq!(report.passes, 1);
    assert!(store.get_account(&addr(0x5)).await.unwrap().is_some());
    assert!(store.get_account(&addr(0x6)).await.unwrap().is_some());
    assert_eq!(store.account_count().await.unwrap(), 6);
    assert_eq!(store.last_scanned_head().await.unwrap(), Some(1500));
}

#[tokio::test]
async fn test_rescan_never_demotes_contracts() {
    let chain = Arc::new(scenario_chain());
    let store = Arc::new(MemoryStore::new());

    let mut driver = Driver::new(chain.clone(), store.clone(), fast_config(), CancellationToken::new());
    driver.run(RunMode::Bounded { floor: 0 }).await.unwrap();

    // Code disappears (self-destruct) and the balance changes
    chain.clear_code(addr(0xD));
    chain.set_balance(addr(0xD), ether(1));

    let mut driver = Driver::new(chain, store.clone(), fast_config(), CancellationToken::new());
    let report = driver.run(RunMode::Bounded { floor: 0 }).await.unwrap();

    assert_eq!(report.conflicting_batches, 1);
    assert_eq!(store.account_count().await.unwrap(), 4);

    let d = store.get_account(&addr(0xD)).await.unwrap().unwrap();
    assert_eq!(d.account_type, AccountType::Contract);
    assert_eq!(d.balance.base_units(), ether(1));
}
