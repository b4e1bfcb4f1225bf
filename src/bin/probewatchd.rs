use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use probewatch::config::{self, Config};
use probewatch::notify::ChannelNotifier;
use probewatch::scheduler;
use probewatch::store::sqlite::SqliteStore;
use probewatch::store::Store;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Multi-environment health-probing daemon.
#[derive(Parser, Debug)]
#[command(name = "probewatchd", version, about)]
struct Args {
    /// Path to the environments YAML document.
    #[arg(long, default_value = "environments.yml")]
    environments: String,

    /// Path to the checks YAML document.
    #[arg(long, default_value = "checks.yml")]
    checks: String,

    /// Path to the sqlite database file.
    #[arg(long, default_value = "statuspage.db")]
    db: String,

    /// Number of checks run in parallel.
    #[arg(long, default_value_t = 20)]
    worker: usize,

    /// Default period for checks that don't set `every`.
    #[arg(long, default_value = "1m")]
    duration: String,

    /// Public URL embedded in notification bodies.
    #[arg(long)]
    self_url: Option<String>,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();

    let environments_raw = std::fs::read_to_string(&args.environments)
        .with_context(|| format!("failed to read {}", args.environments))?;
    let environments = config::load_environments(&environments_raw).context("failed to load environments")?;

    let checks_raw = std::fs::read_to_string(&args.checks).with_context(|| format!("failed to read {}", args.checks))?;
    let checks = config::load_checks(&checks_raw).context("failed to load checks")?;

    let config = Config {
        worker: args.worker,
        duration: args.duration,
        db_path: args.db,
        self_url: args.self_url,
        environments,
        checks,
    };

    let resolved = config.resolve().context("invalid configuration")?;
    info!(checks = resolved.checks.len(), environments = resolved.environments.len(), "configuration resolved");

    let backend = SqliteStore::new(&resolved.db_path).await.context("failed to open store")?;

    let mut targets_by_environment = HashMap::new();
    for env in &resolved.environments {
        targets_by_environment.insert(env.id.clone(), env.notifications.clone());
    }
    let notifier = Arc::new(ChannelNotifier::new(targets_by_environment, resolved.self_url.clone()));

    let store = Arc::new(Store::new(Box::new(backend), notifier));

    let reconcile_rows: Vec<(String, String, String)> = resolved
        .checks
        .iter()
        .map(|c| (c.environment.clone(), c.check.clone(), c.name.clone()))
        .collect();
    store.reconcile(&reconcile_rows).await.context("failed to reconcile check status")?;

    let handle = scheduler::spawn(&resolved, store.clone()).context("failed to start scheduler")?;

    info!("probewatchd running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;

    info!("shutdown signal received");
    handle.shutdown().await;

    Ok(())
}
