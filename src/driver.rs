//! Rich-list indexing driver
//!
//! Runs the scan cycle as an explicit state machine:
//!
//! ```text
//! Scanning -> BatchCheck -> Resolving -> Persisting -> Evicting -> Scanning
//!                 |                                       |
//!                 +-> Scanning (batch not full)           +-> BatchCheck (final window)
//!                 +-> Done (final window, nothing pending)
//! ```
//!
//! One window and one batch are in flight at a time. Chain reads are retried
//! until they succeed; persistence errors end the run.

use std::sync::Arc;
use std::time::Duration;

use eyre::{Result, WrapErr};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::AddressCache;
use crate::chain::ChainReader;
use crate::config::Config;
use crate::fetcher::BalanceFetcher;
use crate::retry::{retry_transient, sleep_or_cancel};
use crate::scanner::{plan_windows, WindowScanner};
use crate::store::{AccountStore, UpsertSink};
use crate::types::AddressRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Scanning,
    BatchCheck,
    Resolving,
    Persisting,
    Evicting,
    /// Continuous mode, between passes
    Waiting,
    /// Bounded run reached its floor
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Scan from the current head down to `floor` once, then stop
    Bounded { floor: u64 },
    /// Catch up to `floor` (or the stored resume point), then follow the head
    Continuous { floor: u64 },
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub window_size: u64,
    pub batch_threshold: usize,
    pub fetch_chunk_size: usize,
    pub write_batch_size: usize,
    pub cache_max_size: usize,
    pub reduce_factor: f64,
    pub decimals: u8,
    pub scan_delay: Duration,
    pub retry_delay: Duration,
    pub poll_interval: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl DriverConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            window_size: config.window_size,
            batch_threshold: config.batch_threshold,
            fetch_chunk_size: config.fetch_chunk_size,
            write_batch_size: config.write_batch_size,
            cache_max_size: config.cache_max_size,
            reduce_factor: config.reduce_factor,
            decimals: config.decimals,
            scan_delay: config.scan_delay(),
            retry_delay: config.retry_delay(),
            poll_interval: config.poll_interval(),
        }
    }
}

/// Counters accumulated over a run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DriverReport {
    pub passes: u64,
    pub windows_scanned: u64,
    pub addresses_observed: u64,
    pub records_written: u64,
    pub conflicting_batches: u64,
    pub failed_lookups: u64,
    pub evicted: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassOutcome {
    Completed,
    Cancelled,
}

pub struct Driver {
    chain: Arc<dyn ChainReader>,
    store: Arc<dyn AccountStore>,
    scanner: WindowScanner,
    fetcher: BalanceFetcher,
    sink: UpsertSink,
    cache: AddressCache,
    config: DriverConfig,
    cancel: CancellationToken,
    state: DriverState,
    report: DriverReport,
}

impl Driver {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        store: Arc<dyn AccountStore>,
        config: DriverConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            scanner: WindowScanner::new(Arc::clone(&chain)),
            fetcher: BalanceFetcher::new(Arc::clone(&chain), config.fetch_chunk_size, config.decimals),
            sink: UpsertSink::new(Arc::clone(&store), config.write_batch_size),
            cache: AddressCache::new(),
            chain,
            store,
            config,
            cancel,
            state: DriverState::Scanning,
            report: DriverReport::default(),
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn cache(&self) -> &AddressCache {
        &self.cache
    }

    pub fn report(&self) -> DriverReport {
        self.report
    }

    /// Run until the bounded scan completes or the cancellation token fires
    ///
    /// A batch that is being resolved or persisted when cancellation arrives
    /// is finished first.
    pub async fn run(&mut self, mode: RunMode) -> Result<DriverReport> {
        match mode {
            RunMode::Bounded { floor } => {
                let Some(head) = self.chain_head().await else {
                    return Ok(self.report);
                };
                if self.run_pass(head, floor).await? == PassOutcome::Completed {
                    self.record_resume_point(head, floor).await?;
                    info!(head, floor, "Bounded scan complete");
                }
            }
            RunMode::Continuous { floor } => {
                let mut floor = match self.store.last_scanned_head().await? {
                    Some(resume) => resume.max(floor),
                    None => floor,
                };
                info!(floor, "Following chain head");

                loop {
                    let Some(head) = self.chain_head().await else {
                        break;
                    };

                    if head > floor {
                        match self.run_pass(head, floor).await? {
                            PassOutcome::Completed => {
                                self.record_resume_point(head, floor).await?;
                                floor = head;
                            }
                            PassOutcome::Cancelled => break,
                        }
                    } else {
                        debug!(head, "No new blocks");
                    }

                    self.state = DriverState::Waiting;
                    if !sleep_or_cancel(self.config.poll_interval, &self.cancel).await {
                        break;
                    }
                }
            }
        }

        if self.cancel.is_cancelled() {
            info!("Driver stopped");
        }
        Ok(self.report)
    }

    async fn chain_head(&self) -> Option<u64> {
        let chain = &self.chain;
        retry_transient("chain head query", self.config.retry_delay, &self.cancel, move || {
            chain.chain_head()
        })
        .await
    }

    /// Remember `head` as fully scanned if this pass joined up with the
    /// previous resume point
    ///
    /// Without a previous resume point only a pass down to genesis counts:
    /// blocks below a nonzero floor were never scanned.
    async fn record_resume_point(&self, head: u64, floor: u64) -> Result<()> {
        let previous = self.store.last_scanned_head().await?;
        let contiguous = previous.map_or(floor == 0, |p| floor <= p && head > p);
        if contiguous {
            self.store
                .set_last_scanned_head(head)
                .await
                .wrap_err("failed to record resume point")?;
        }
        Ok(())
    }

    async fn run_pass(&mut self, head: u64, floor: u64) -> Result<PassOutcome> {
        info!(head, floor, window_size = self.config.window_size, "Starting rich-list pass");

        let mut plan = plan_windows(head, floor, self.config.window_size);
        let mut final_window = false;
        let mut retrying = false;
        let mut resolved: Vec<AddressRecord> = Vec::new();

        self.state = DriverState::Scanning;
        loop {
            self.state = match self.state {
                DriverState::Scanning => {
                    if self.cancel.is_cancelled() {
                        return Ok(PassOutcome::Cancelled);
                    }

                    match plan.next() {
                        None => {
                            final_window = true;
                            DriverState::BatchCheck
                        }
                        Some(window) => {
                            let scanner = &self.scanner;
                            let Some(addresses) = retry_transient(
                                "window scan",
                                self.config.retry_delay,
                                &self.cancel,
                                move || scanner.scan(window),
                            )
                            .await
                            else {
                                return Ok(PassOutcome::Cancelled);
                            };

                            self.report.windows_scanned += 1;
                            self.report.addresses_observed += addresses.len() as u64;
                            self.cache.observe_all(addresses);
                            final_window = plan.is_final(&window);

                            info!(
                                from = window.from_block,
                                to = window.to_block,
                                pending = self.cache.pending_len(),
                                cached = self.cache.len(),
                                "Scanned window"
                            );
                            DriverState::BatchCheck
                        }
                    }
                }

                DriverState::BatchCheck => {
                    let pending = self.cache.pending_len();
                    if pending >= self.config.batch_threshold || (final_window && pending > 0) {
                        // Lookups that failed on the last window are retried after a pause
                        if retrying
                            && final_window
                            && !sleep_or_cancel(self.config.retry_delay, &self.cancel).await
                        {
                            return Ok(PassOutcome::Cancelled);
                        }
                        DriverState::Resolving
                    } else if final_window {
                        DriverState::Done
                    } else {
                        if !sleep_or_cancel(self.config.scan_delay, &self.cancel).await {
                            return Ok(PassOutcome::Cancelled);
                        }
                        DriverState::Scanning
                    }
                }

                DriverState::Resolving => {
                    let batch = self.cache.drain_pending();
                    let outcome = self.fetcher.resolve(&batch, head).await;

                    retrying = !outcome.failed.is_empty();
                    self.report.failed_lookups += outcome.failed.len() as u64;
                    self.cache.requeue(outcome.failed);

                    debug!(requested = batch.len(), resolved = outcome.records.len(), "Resolved batch");
                    resolved = outcome.records;
                    DriverState::Persisting
                }

                DriverState::Persisting => {
                    let written = self
                        .sink
                        .write(&resolved)
                        .await
                        .wrap_err("failed to persist account batch")?;

                    self.report.records_written += written.written() as u64;
                    self.report.conflicting_batches += written.conflicting_batches as u64;
                    info!(
                        inserted = written.inserted,
                        upserted = written.upserted,
                        "Persisted account batch"
                    );
                    resolved.clear();
                    DriverState::Evicting
                }

                DriverState::Evicting => {
                    let evicted = self
                        .cache
                        .evict_if_over_capacity(self.config.cache_max_size, self.config.reduce_factor);
                    if evicted > 0 {
                        self.report.evicted += evicted as u64;
                        debug!(evicted, remaining = self.cache.len(), "Evicted cache entries");
                    }

                    if final_window {
                        DriverState::BatchCheck
                    } else {
                        DriverState::Scanning
                    }
                }

                DriverState::Done | DriverState::Waiting => {
                    self.report.passes += 1;
                    info!(
                        head,
                        windows = self.report.windows_scanned,
                        written = self.report.records_written,
                        "Pass complete"
                    );
                    self.state = DriverState::Done;
                    return Ok(PassOutcome::Completed);
                }
            };
        }
    }
}
