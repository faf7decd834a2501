//! Window planning and participant extraction

use std::collections::BTreeSet;
use std::sync::Arc;

use alloy_primitives::Address;

use crate::chain::{ChainError, ChainReader};

/// Half-open block range `[from_block, to_block)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    pub from_block: u64,
    pub to_block: u64,
}

impl ScanWindow {
    /// `None` if `from_block > to_block`
    pub fn new(from_block: u64, to_block: u64) -> Option<Self> {
        (from_block <= to_block).then_some(Self { from_block, to_block })
    }

    pub fn len(&self) -> u64 {
        self.to_block - self.from_block
    }

    pub fn is_empty(&self) -> bool {
        self.from_block == self.to_block
    }
}

/// Walks `[floor, head)` from the head downward in windows of `window_size`
///
/// The windows of one plan never overlap and their union is exactly
/// `[floor, head)`. The last window may be shorter.
#[derive(Debug, Clone)]
pub struct WindowPlan {
    floor: u64,
    window_size: u64,
    next_to: u64,
}

impl WindowPlan {
    pub fn new(head: u64, floor: u64, window_size: u64) -> Self {
        Self {
            floor,
            window_size: window_size.max(1),
            next_to: head.max(floor),
        }
    }

    /// Whether `window` is the last one this plan yields
    pub fn is_final(&self, window: &ScanWindow) -> bool {
        window.from_block <= self.floor
    }

    pub fn floor(&self) -> u64 {
        self.floor
    }
}

impl Iterator for WindowPlan {
    type Item = ScanWindow;

    fn next(&mut self) -> Option<ScanWindow> {
        if self.next_to <= self.floor {
            return None;
        }
        let to_block = self.next_to;
        let from_block = to_block.saturating_sub(self.window_size).max(self.floor);
        self.next_to = from_block;
        Some(ScanWindow { from_block, to_block })
    }
}

/// Windows of one pass over `[floor, head)`, highest first
pub fn plan_windows(head: u64, floor: u64, window_size: u64) -> WindowPlan {
    WindowPlan::new(head, floor, window_size)
}

/// Extracts the addresses active in a block range
pub struct WindowScanner {
    chain: Arc<dyn ChainReader>,
}

impl WindowScanner {
    pub fn new(chain: Arc<dyn ChainReader>) -> Self {
        Self { chain }
    }

    /// Union of transaction senders, transaction receivers and block miners in
    /// `window`. Contract creations contribute only their sender.
    pub async fn scan(&self, window: ScanWindow) -> Result<BTreeSet<Address>, ChainError> {
        if window.is_empty() {
            return Ok(BTreeSet::new());
        }

        let txs = self
            .chain
            .transactions_in_range(window.from_block, window.to_block)
            .await?;
        let blocks = self
            .chain
            .blocks_in_range(window.from_block, window.to_block)
            .await?;

        let senders = txs.iter().map(|tx| tx.from);
        let receivers = txs.iter().filter_map(|tx| tx.to);
        let miners = blocks.iter().map(|b| b.miner);

        Ok(senders.chain(receivers).chain(miners).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: Windows cover [floor, head) without gaps or overlaps
    #[test]
    fn test_window_plan_coverage() {
        for (head, floor, size) in [(1500, 0, 500), (1234, 17, 100), (10, 0, 3), (7, 7, 5), (1, 0, 1000)] {
            let windows: Vec<ScanWindow> = WindowPlan::new(head, floor, size).collect();

            let mut expected_to = head;
            for w in &windows {
                assert_eq!(w.to_block, expected_to, "Windows must be contiguous");
                assert!(w.from_block < w.to_block, "Windows are never empty");
                assert!(w.len() <= size);
                expected_to = w.from_block;
            }
            assert_eq!(expected_to, floor.min(head), "Coverage must reach the floor");

            let covered: u64 = windows.iter().map(|w| w.len()).sum();
            assert_eq!(covered, head.saturating_sub(floor));
        }
    }

    // Test 2: Descending order and final-window detection
    #[test]
    fn test_window_plan_order_and_final() {
        let plan = WindowPlan::new(1500, 100, 500);
        let windows: Vec<ScanWindow> = plan.clone().collect();

        assert_eq!(
            windows,
            vec![
                ScanWindow { from_block: 1000, to_block: 1500 },
                ScanWindow { from_block: 500, to_block: 1000 },
                ScanWindow { from_block: 100, to_block: 500 },
            ]
        );
        assert!(!plan.is_final(&windows[0]));
        assert!(!plan.is_final(&windows[1]));
        assert!(plan.is_final(&windows[2]));
    }

    // Test 3: Head at or below floor yields nothing
    #[test]
    fn test_window_plan_empty() {
        assert_eq!(WindowPlan::new(100, 100, 50).count(), 0);
        assert_eq!(WindowPlan::new(50, 100, 50).count(), 0);
    }

    #[test]
    fn test_scan_window_bounds() {
        assert!(ScanWindow::new(10, 5).is_none());
        let w = ScanWindow::new(5, 5).unwrap();
        assert!(w.is_empty());
        assert_eq!(w.len(), 0);
    }
}
