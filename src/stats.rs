//! Block statistics pipeline
//!
//! Samples every block whose number is a multiple of `interval`, walking down
//! from the head, and stores one [`BlockStatRecord`] per sample. The block time
//! of a sample is derived from the next higher sample, so the highest sample is
//! only read as look-ahead.

use std::sync::Arc;
use std::time::Duration;

use eyre::{Result, WrapErr};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chain::ChainReader;
use crate::retry::{retry_transient, sleep_or_cancel};
use crate::store::AccountStore;
use crate::types::{BlockStatRecord, ChainBlock};

/// Build the record for `block`, using `next` (a higher block) as look-ahead
pub fn derive_block_stat(block: &ChainBlock, next: &ChainBlock) -> BlockStatRecord {
    let blocks = next.number.saturating_sub(block.number);
    let block_time = if blocks == 0 {
        0.0
    } else {
        next.timestamp.saturating_sub(block.timestamp) as f64 / blocks as f64
    };

    BlockStatRecord {
        number: block.number,
        timestamp: block.timestamp,
        difficulty: block.difficulty,
        tx_count: block.tx_count,
        gas_used: block.gas_used,
        gas_limit: block.gas_limit,
        miner: block.miner,
        block_time,
        uncle_count: block.uncle_count,
    }
}

/// Heights sampled by a pass, highest first
///
/// Samples sit on multiples of `interval` so that passes started at different
/// heads land on the same grid. The first height is the highest multiple not
/// above `head`.
pub fn sample_heights(head: u64, range: u64, interval: u64) -> Vec<u64> {
    let interval = interval.max(1);
    let lowest = head.saturating_sub(range);

    let mut heights = Vec::new();
    let mut number = head - head % interval;
    loop {
        heights.push(number);
        match number.checked_sub(interval) {
            Some(next) if next >= lowest => number = next,
            _ => break,
        }
    }
    heights
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsMode {
    /// One overwriting pass, then stop
    Rescan { interval: u64, range: u64 },
    /// Insert-only passes every poll interval until cancelled
    Tail { interval: u64, range: u64 },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsReport {
    pub passes: u64,
    pub sampled: u64,
    pub written: u64,
    /// Height of the already-stored record that ended the last insert-only pass
    pub stopped_at: Option<u64>,
}

pub struct StatsPipeline {
    chain: Arc<dyn ChainReader>,
    store: Arc<dyn AccountStore>,
    retry_delay: Duration,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl StatsPipeline {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        store: Arc<dyn AccountStore>,
        retry_delay: Duration,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            chain,
            store,
            retry_delay,
            poll_interval,
            cancel,
        }
    }

    pub async fn run(&self, mode: StatsMode) -> Result<StatsReport> {
        let mut total = StatsReport::default();

        match mode {
            StatsMode::Rescan { interval, range } => {
                let Some(head) = self.chain_head().await else {
                    return Ok(total);
                };
                info!(head, interval, range, "Rescanning block statistics");
                total = self.run_pass(head, range, interval, true).await?;
            }
            StatsMode::Tail { interval, range } => loop {
                let Some(head) = self.chain_head().await else {
                    break;
                };

                let pass = self.run_pass(head, range, interval, false).await?;
                total.passes += pass.passes;
                total.sampled += pass.sampled;
                total.written += pass.written;
                if pass.passes > 0 {
                    total.stopped_at = pass.stopped_at;
                }

                if !sleep_or_cancel(self.poll_interval, &self.cancel).await {
                    break;
                }
            },
        }

        Ok(total)
    }

    /// Sample `[head - range, head]` every `interval` blocks
    ///
    /// Without `rescan` records are only inserted, and the first sample that is
    /// already stored ends the pass. With `rescan` every sample is overwritten.
    pub async fn run_pass(&self, head: u64, range: u64, interval: u64, rescan: bool) -> Result<StatsReport> {
        let mut report = StatsReport::default();
        let mut heights = sample_heights(head, range, interval).into_iter();

        let Some(first) = heights.next() else {
            return Ok(report);
        };
        let Some(mut next) = self.fetch_block(first).await else {
            return Ok(report);
        };

        for number in heights {
            let Some(block) = self.fetch_block(number).await else {
                return Ok(report);
            };
            report.sampled += 1;

            let record = derive_block_stat(&block, &next);
            if rescan {
                self.store
                    .put_block_stat(&record)
                    .await
                    .wrap_err_with(|| format!("failed to store stats for block {number}"))?;
                report.written += 1;
            } else {
                let written = self
                    .store
                    .insert_block_stat(&record)
                    .await
                    .wrap_err_with(|| format!("failed to store stats for block {number}"))?;
                if !written {
                    debug!(number, "Reached indexed block statistics");
                    report.stopped_at = Some(number);
                    break;
                }
                report.written += 1;
            }

            next = block;
        }

        report.passes = 1;
        info!(
            head,
            sampled = report.sampled,
            written = report.written,
            rescan,
            "Block statistics pass complete"
        );
        Ok(report)
    }

    async fn chain_head(&self) -> Option<u64> {
        let chain = &self.chain;
        retry_transient("chain head query", self.retry_delay, &self.cancel, move || chain.chain_head()).await
    }

    /// `None` on cancellation. A block the node reports as missing is
    /// retried like any other failed read.
    async fn fetch_block(&self, number: u64) -> Option<ChainBlock> {
        loop {
            let chain = &self.chain;
            match retry_transient("block query", self.retry_delay, &self.cancel, move || chain.block(number)).await? {
                Some(block) => return Some(block),
                None => {
                    warn!(number, "Node returned no block, retrying in {:?}", self.retry_delay);
                    if !sleep_or_cancel(self.retry_delay, &self.cancel).await {
                        return None;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, U256};

    fn block(number: u64, timestamp: u64) -> ChainBlock {
        ChainBlock {
            number,
            timestamp,
            difficulty: U256::from(number * 10),
            gas_used: 21_000,
            gas_limit: 8_000_000,
            miner: Address::from([0x11; 20]),
            uncle_count: 1,
            tx_count: 3,
        }
    }

    #[test]
    fn test_block_time_from_look_ahead() {
        let record = derive_block_stat(&block(100, 1000), &block(200, 1100));
        assert_eq!(record.number, 100);
        assert_eq!(record.timestamp, 1000);
        assert_eq!(record.block_time, 1.0);
        assert_eq!(record.tx_count, 3);
        assert_eq!(record.uncle_count, 1);
        assert_eq!(record.difficulty, U256::from(1000));
    }

    #[test]
    fn test_block_time_same_height() {
        let record = derive_block_stat(&block(5, 50), &block(5, 50));
        assert_eq!(record.block_time, 0.0);
    }

    #[test]
    fn test_sample_heights() {
        assert_eq!(sample_heights(1000, 300, 100), vec![1000, 900, 800, 700]);
        assert_eq!(sample_heights(250, 1000, 100), vec![200, 100, 0]);
        assert_eq!(sample_heights(1050, 200, 100), vec![1000, 900]);
        assert_eq!(sample_heights(10, 0, 5), vec![10]);
        // Zero interval is treated as one
        assert_eq!(sample_heights(3, 2, 0), vec![3, 2, 1]);
    }
}
