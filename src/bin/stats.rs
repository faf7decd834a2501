//! Block statistics tool
//!
//! Samples block headers every `statsInterval` blocks and stores derived
//! statistics. With `RESCAN=<interval>:<range>` it does a single overwriting
//! pass and exits 0; otherwise it keeps polling the head until Ctrl-C.
//! Exits with status 9 on an unrecoverable error.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;
use tracing::error;

use explorer_indexer::app;
use explorer_indexer::config::{Config, RescanSpec};

const EXIT_FAILURE: u8 = 9;

#[derive(Parser)]
#[command(name = "stats")]
#[command(about = "Sample per-block statistics")]
struct Args {
    /// Config file path (defaults to ./config.json when present)
    #[arg(long, env = "EXPLORER_CONFIG")]
    config: Option<PathBuf>,

    /// One overwriting pass, `<interval>:<range>`
    #[arg(long, env = "RESCAN")]
    rescan: Option<RescanSpec>,
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

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };
    app::init_tracing(config.quiet);

    match app::run_stats(&config, args.rescan, app::shutdown_token()).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Block statistics failed: {e:?}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
