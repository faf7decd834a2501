//! Indexer configuration
//!
//! Read once at startup from a JSON file (camelCase keys), then overridden
//! field by field from `EXPLORER_*` environment variables.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "config.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: String, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Node host name or IP
    pub node_addr: Option<String>,
    pub rpc_port: u16,
    pub ws_port: u16,
    pub use_websocket: bool,
    pub rpc_timeout_secs: u64,

    /// redb database file
    pub db_path: PathBuf,

    /// Blocks per scan window
    pub window_size: u64,
    /// Pending addresses that trigger a resolve/persist cycle
    pub batch_threshold: usize,
    /// Addresses resolved per chunk of balance lookups
    pub fetch_chunk_size: usize,
    /// Records per bulk insert
    pub write_batch_size: usize,
    pub cache_max_size: usize,
    /// Fraction of `cache_max_size` kept after an eviction pass
    pub reduce_factor: f64,
    pub floor_block: u64,
    /// Decimals of the chain's display unit
    pub decimals: u8,

    pub scan_delay_ms: u64,
    pub retry_delay_ms: u64,
    pub poll_interval_secs: u64,

    pub stats_interval: u64,
    pub stats_range: u64,

    pub quiet: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_addr: None,
            rpc_port: 8545,
            ws_port: 8546,
            use_websocket: false,
            rpc_timeout_secs: 30,
            db_path: PathBuf::from("explorer.redb"),
            window_size: 500,
            batch_threshold: 100,
            fetch_chunk_size: 100,
            write_batch_size: 200,
            cache_max_size: 100_000,
            reduce_factor: 0.6,
            floor_block: 0,
            decimals: 18,
            scan_delay_ms: 300,
            retry_delay_ms: 5_000,
            poll_interval_secs: 60,
            stats_interval: 100,
            stats_range: 1_000,
            quiet: false,
        }
    }
}

fn parse_env<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        field: key.to_string(),
        reason: e.to_string(),
    })
}

macro_rules! env_overrides {
    ($config:ident, $lookup:ident, { $($field:ident => $key:literal),* $(,)? }) => {
        $(
            if let Some(raw) = $lookup($key) {
                $config.$field = parse_env($key, &raw)?;
            }
        )*
    };
}

impl Config {
    /// Load the config file, apply environment overrides and validate.
    ///
    /// Without an explicit path, `config.json` in the working directory is
    /// used when present; otherwise defaults plus environment apply.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("EXPLORER_NODE_ADDR") {
            self.node_addr = Some(addr.trim().to_string());
        }
        if let Some(path) = lookup("EXPLORER_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }

        env_overrides!(self, lookup, {
            rpc_port => "EXPLORER_RPC_PORT",
            ws_port => "EXPLORER_WS_PORT",
            use_websocket => "EXPLORER_USE_WEBSOCKET",
            rpc_timeout_secs => "EXPLORER_RPC_TIMEOUT_SECS",
            window_size => "EXPLORER_WINDOW_SIZE",
            batch_threshold => "EXPLORER_BATCH_THRESHOLD",
            fetch_chunk_size => "EXPLORER_FETCH_CHUNK_SIZE",
            write_batch_size => "EXPLORER_WRITE_BATCH_SIZE",
            cache_max_size => "EXPLORER_CACHE_MAX_SIZE",
            reduce_factor => "EXPLORER_REDUCE_FACTOR",
            floor_block => "EXPLORER_FLOOR_BLOCK",
            decimals => "EXPLORER_DECIMALS",
            scan_delay_ms => "EXPLORER_SCAN_DELAY_MS",
            retry_delay_ms => "EXPLORER_RETRY_DELAY_MS",
            poll_interval_secs => "EXPLORER_POLL_INTERVAL_SECS",
            stats_interval => "EXPLORER_STATS_INTERVAL",
            stats_range => "EXPLORER_STATS_RANGE",
            quiet => "EXPLORER_QUIET",
        });

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.node_addr.as_deref() {
            None => return Err(ConfigError::Missing("nodeAddr")),
            Some(addr) if addr.is_empty() => return Err(ConfigError::Missing("nodeAddr")),
            Some(_) => {}
        }

        let invalid = |field: &str, reason: &str| ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.to_string(),
        };

        if self.window_size == 0 {
            return Err(invalid("windowSize", "must be greater than zero"));
        }
        if self.batch_threshold == 0 {
            return Err(invalid("batchThreshold", "must be greater than zero"));
        }
        if self.fetch_chunk_size == 0 {
            return Err(invalid("fetchChunkSize", "must be greater than zero"));
        }
        if self.write_batch_size == 0 {
            return Err(invalid("writeBatchSize", "must be greater than zero"));
        }
        if !(self.reduce_factor > 0.0 && self.reduce_factor <= 1.0) {
            return Err(invalid("reduceFactor", "must be in (0, 1]"));
        }
        if self.decimals > 77 {
            return Err(invalid("decimals", "must be at most 77"));
        }
        if self.stats_interval == 0 {
            return Err(invalid("statsInterval", "must be greater than zero"));
        }
        Ok(())
    }

    pub fn node_addr(&self) -> &str {
        self.node_addr.as_deref().unwrap_or("localhost")
    }

    pub fn rpc_url(&self) -> String {
        format!("http://{}:{}", self.node_addr(), self.rpc_port)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}", self.node_addr(), self.ws_port)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn scan_delay(&self) -> Duration {
        Duration::from_millis(self.scan_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Bounded stats rescan requested through `RESCAN=<interval>:<range>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RescanSpec {
    pub interval: u64,
    pub range: u64,
}

impl FromStr for RescanSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::Invalid {
            field: "RESCAN".to_string(),
            reason: reason.to_string(),
        };

        let (interval, range) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| invalid("expected <interval>:<range>"))?;
        let interval: u64 = interval
            .trim()
            .parse()
            .map_err(|_| invalid("interval is not a number"))?;
        let range: u64 = range
            .trim()
            .parse()
            .map_err(|_| invalid("range is not a number"))?;

        if interval == 0 {
            return Err(invalid("interval must be greater than zero"));
        }
        Ok(Self { interval, range })
    }
}
