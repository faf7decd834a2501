//! Explorer indexer - rich-list and block statistics for EVM block explorers
//!
//! # Usage
//!
//! 1. Run `richlist` to index account balances (continuous, or `--bounded`)
//! 2. Run `stats` to sample block statistics
//! 3. Query the database with `top` and `info`

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eyre::Result;

use explorer_indexer::app;
use explorer_indexer::config::{Config, RescanSpec};
use explorer_indexer::types::normalize_address;

#[derive(Parser)]
#[command(name = "explorer-indexer")]
#[command(about = "Incremental rich-list and block statistics indexer")]
struct Cli {
    /// Config file path (defaults to ./config.json when present)
    #[arg(long, global = true, env = "EXPLORER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index addresses and balances
    Richlist {
        /// Scan once from the head down to the floor block, then exit
        #[arg(long)]
        bounded: bool,

        /// Lowest block to scan (overrides `floorBlock`)
        #[arg(long)]
        floor: Option<u64>,
    },

    /// Sample block statistics
    Stats {
        /// One overwriting pass, `<interval>:<range>`
        #[arg(long, env = "RESCAN")]
        rescan: Option<RescanSpec>,
    },

    /// Print the top of the rich list
    Top {
        #[arg(long, default_value = "20")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Show index database stats
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    app::init_tracing(config.quiet);

    match cli.command {
        Commands::Richlist { bounded, floor } => {
            if let Some(floor) = floor {
                config.floor_block = floor;
            }
            app::run_richlist(&config, bounded, app::shutdown_token()).await?;
        }

        Commands::Stats { rescan } => {
            app::run_stats(&config, rescan, app::shutdown_token()).await?;
        }

        Commands::Top { limit, offset } => {
            let store = app::open_store(&config)?;
            let accounts = store.top_accounts(limit, offset).await?;
            for (rank, account) in accounts.iter().enumerate() {
                println!(
                    "{:>6}  {}  {:>8}  {}",
                    offset + rank + 1,
                    normalize_address(&account.address),
                    account.account_type,
                    account.balance
                );
            }
        }

        Commands::Info => {
            let store = app::open_store(&config)?;
            println!("Database: {}", config.db_path.display());
            println!("Accounts: {}", store.account_count().await?);
            match store.last_scanned_head().await? {
                Some(head) => println!("Last scanned head: {}", head),
                None => println!("Last scanned head: none"),
            }
        }
    }

    Ok(())
}
