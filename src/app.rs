//! Wiring shared by the binaries: logging, backends and shutdown handling

use std::sync::Arc;

use eyre::{Result, WrapErr};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::chain::ChainReader;
use crate::config::{Config, RescanSpec};
use crate::driver::{Driver, DriverConfig, DriverReport, RunMode};
use crate::redb_store::RedbStore;
use crate::rpc::RpcChainReader;
use crate::stats::{StatsMode, StatsPipeline, StatsReport};
use crate::store::AccountStore;

/// Install the fmt subscriber. `RUST_LOG` wins over the default level, which
/// is `warn` for quiet runs and `info` otherwise.
pub fn init_tracing(quiet: bool) {
    let default_level = if quiet { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}

/// Token cancelled on Ctrl-C
pub fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested, finishing current batch"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
        trigger.cancel();
    });
    cancel
}

pub fn open_chain(config: &Config) -> Arc<dyn ChainReader> {
    Arc::new(RpcChainReader::from_config(config))
}

pub fn open_store(config: &Config) -> Result<Arc<dyn AccountStore>> {
    let store = RedbStore::create(&config.db_path)
        .wrap_err_with(|| format!("failed to open database at {}", config.db_path.display()))?;
    Ok(Arc::new(store))
}

async fn log_client(chain: &dyn ChainReader) {
    match chain.client_version().await {
        Ok(version) => info!(client = %version, "Connected to node"),
        Err(e) => warn!(error = %e, "Could not query node client version"),
    }
}

/// Build the rich-list driver from config and run it to completion
pub async fn run_richlist(config: &Config, bounded: bool, cancel: CancellationToken) -> Result<DriverReport> {
    let chain = open_chain(config);
    let store = open_store(config)?;
    log_client(chain.as_ref()).await;

    let floor = config.floor_block;
    let mode = if bounded {
        RunMode::Bounded { floor }
    } else {
        RunMode::Continuous { floor }
    };

    let mut driver = Driver::new(chain, store, DriverConfig::from_config(config), cancel);
    let report = driver.run(mode).await?;
    info!(
        passes = report.passes,
        windows = report.windows_scanned,
        written = report.records_written,
        failed_lookups = report.failed_lookups,
        evicted = report.evicted,
        "Rich-list indexer finished"
    );
    Ok(report)
}

/// Run the block statistics pipeline; a rescan request makes it a single pass
pub async fn run_stats(
    config: &Config,
    rescan: Option<RescanSpec>,
    cancel: CancellationToken,
) -> Result<StatsReport> {
    let chain = open_chain(config);
    let store = open_store(config)?;
    log_client(chain.as_ref()).await;

    let mode = match rescan {
        Some(request) => StatsMode::Rescan {
            interval: request.interval,
            range: request.range,
        },
        None => StatsMode::Tail {
            interval: config.stats_interval,
            range: config.stats_range,
        },
    };

    let pipeline = StatsPipeline::new(chain, store, config.retry_delay(), config.poll_interval(), cancel);
    let report = pipeline.run(mode).await?;
    info!(
        passes = report.passes,
        sampled = report.sampled,
        written = report.written,
        "Block statistics finished"
    );
    Ok(report)
}
