//! Distributed enumeration worker
//!
//! Reads the configuration file, connects to the shared store, and runs
//! the lease → expand → checkin loop until there is no more work, the
//! generation limit is reached, or the benchmark budget expires — all of
//! which exit 0. Any fatal error (bad config, seed file missing at root,
//! storage failure) prints one line to stderr and exits 1.
//!
//! Usage: `worker [--config <path>]` (default `constructible.toml`).

#![forbid(unsafe_code)]

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context as _;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use constructible::config::Config;
use constructible::db::MySqlStore;
use constructible::scheduler::{Outcome, RunSettings, Worker};

fn parse_flag(args: &[String], key: &str) -> Option<String> {
    args.iter()
        .position(|arg| arg == key)
        .and_then(|at| args.get(at + 1))
        .cloned()
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run().await {
        Ok(outcome) => {
            info!(?outcome, "worker finished");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("fatal: {err:#}");
            eprintln!("fatal: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<Outcome> {
    let args: Vec<String> = env::args().collect();
    let config_path = PathBuf::from(
        parse_flag(&args, "--config").unwrap_or_else(|| "constructible.toml".to_owned()),
    );

    let config = Config::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    config.dump();

    let ctx = config.scalar_ctx().context("building arithmetic context")?;
    let store = MySqlStore::connect(&config.mysql, &config.mysql_schema)
        .await
        .context("connecting to the store")?;

    let settings = RunSettings::from_config(&config);
    info!(
        client = settings.client_id,
        batch = settings.batch_id,
        max_iterations = settings.max_iterations,
        "worker starting"
    );

    let mut worker = Worker::new(settings, ctx, store);
    Ok(worker.run().await?)
}
