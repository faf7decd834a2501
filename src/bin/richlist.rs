//! Rich-list indexer tool
//!
//! Scans the chain from the head downward, resolving balances for every
//! address seen. Follows the head until Ctrl-C unless `--bounded` is given.
//! Exits with status 1 on a fatal error.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;
use tracing::error;

use explorer_indexer::app;
use explorer_indexer::config::Config;

const EXIT_FAILURE: u8 = 1;

#[derive(Parser)]
#[command(name = "richlist")]
#[command(about = "Index account balances into the rich list")]
struct Args {
    /// Config file path (defaults to ./config.json when present)
    #[arg(long, env = "EXPLORER_CONFIG")]
    config: Option<PathBuf>,

    /// Scan once from the head down to the floor block, then exit
    #[arg(long)]
    bounded: bool,

    /// Lowest block to scan (overrides `floorBlock`)
    #[arg(long)]
    floor: Option<u64>,
}

/// Help and version requests exit cleanly; anything else clap rejects is a
/// startup failure
fn parse_failure_code(err: &clap::Error) -> u8 {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => EXIT_FAILURE,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(parse_failure_code(&e));
        }
    };

    let mut config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };
    app::init_tracing(config.quiet);

    if let Some(floor) = args.floor {
        config.floor_block = floor;
    }

    match app::run_richlist(&config, args.bounded, app::shutdown_token()).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Rich-list indexer failed: {e:?}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
