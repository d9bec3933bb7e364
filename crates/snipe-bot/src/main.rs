//! Expiration-sniper engine - entry point.
//!
//! Exit codes: 0 clean shutdown, 1 configuration error, 2 fatal
//! runtime error, 3 kill-switch halt that did not clear.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use snipe_bot::{Engine, EngineConfig, StaticSource};
use snipe_core::SystemClock;
use snipe_executor::MockVenue;

/// Latency-arbitrage sniper for binary prediction markets.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via SNIPE_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    snipe_telemetry::init_logging()?;

    info!("Starting snipe-bot v{}", env!("CARGO_PKG_VERSION"));

    // Determine config path: CLI arg > SNIPE_CONFIG env var > default.
    let config_path = args
        .config
        .or_else(|| std::env::var("SNIPE_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = match EngineConfig::from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!(?e, "configuration error");
            std::process::exit(e.exit_code());
        }
    };

    if !config.dry_run {
        // The wire-level venue client and discovery feed live outside
        // this repository; live trading requires both to be linked in.
        error!("no live venue client configured; run with dry_run = true");
        std::process::exit(1);
    }

    // Dry-run rehearsal: mock venue, empty discovery feed.
    let venue = Arc::new(MockVenue::default());
    let engine = match Engine::new(config, venue, SystemClock::shared()) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            error!(?e, "engine construction failed");
            std::process::exit(e.exit_code());
        }
    };

    // Ctrl-C initiates the graceful path.
    {
        let engine = engine.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                engine.shutdown();
            }
        });
    }

    let source = Box::new(StaticSource::new(Vec::new()));
    match engine.run(source).await {
        Ok(status) => std::process::exit(status.code()),
        Err(e) => {
            error!(?e, "fatal runtime error");
            std::process::exit(e.exit_code());
        }
    }
}
