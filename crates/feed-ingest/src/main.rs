//! feedd - the Feed ingest daemon
//!
//! Loads configuration, opens the database, builds the engine, and runs
//! scheduler passes over the queue: once by default, or continuously with
//! `--watch`.

use anyhow::Context;
use clap::Parser;
use feed_common::logging::{init_logging, LogConfig};
use feed_ingest::runner::{QueueCallback, Runner};
use feed_ingest::{db, Engine, FeedConfig};
use std::sync::Arc;
use tracing::{error, info};

/// Feed ingest daemon
#[derive(Parser, Debug)]
#[command(name = "feedd", version, about)]
struct Args {
    /// Path to the feed configuration file (default: $FEED_CONFIG)
    #[arg(long, env = "FEED_CONFIG")]
    config: String,

    /// Keep polling the queue instead of exiting after one pass
    #[arg(long)]
    watch: bool,

    /// Seconds between queue polls in watch mode
    #[arg(long, default_value_t = 30)]
    interval: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let log_config = LogConfig::from_env().unwrap_or_default();
    if let Err(e) = init_logging(&log_config) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(args).await {
        error!(error = %e, "daemon failed");
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = FeedConfig::load_from(&args.config).context("loading configuration")?;
    let pool = db::connect(&config.database.url)
        .await
        .context("opening database")?;
    db::init_schema(&pool).await.context("creating schema")?;

    let engine = Arc::new(Engine::new(config, pool.clone()).context("building engine")?);
    let callback = Arc::new(QueueCallback::new(pool));
    let runner = Runner::new(engine.clone(), callback);

    info!(
        version = feed_ingest::VERSION,
        threads = engine.config().dataset.threads,
        "feedd started"
    );

    loop {
        let dispatched = runner.run_queue().await.context("queue pass")?;
        info!(dispatched, "queue pass complete");

        if !args.watch {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_secs(args.interval)).await;
    }

    Ok(())
}
