//! Event store daemon
//!
//! Usage: `adx-store [config.toml]`. Without a path the configuration comes
//! from `ADX_STORE_*` environment variables.

use adx_store::{Config, EventStore, OpContext};
use anyhow::Context;
use tracing_subscriber::EnvFilter;

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("loading configuration from {}", path))?,
        None => Config::from_env().context("loading configuration from environment")?,
    };

    init_tracing(&config);
    tracing::info!(
        version = %config.service_version,
        data_dir = %config.data_dir.display(),
        "Starting {}",
        config.service_name
    );

    let store = EventStore::open(config).context("opening event store")?;
    let mut tasks = store.spawn_background();

    // Timer-triggered flush failures have no caller; surface them here
    let error_logger = tasks.take_errors().map(|mut errors| {
        tokio::spawn(async move {
            while let Some(e) = errors.recv().await {
                tracing::error!(error = %e, "Background flush error");
            }
        })
    });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("Shutting down event store");

    tasks.shutdown().await;
    if let Some(handle) = error_logger {
        let _ = handle.await;
    }

    let ctx = OpContext::background();
    match store.earnings_entries(&ctx) {
        Ok(entries) => tracing::info!(miners = entries.len(), "Ledger balances persisted"),
        Err(e) => tracing::warn!(error = %e, "Could not read ledger balances"),
    }
    let metrics = serde_json::to_string(&store.get_metrics()).context("encoding metrics")?;
    tracing::info!(%metrics, "Final metrics");
    tracing::debug!(exposition = %store.metrics().encode_text(), "Prometheus exposition");

    store.close().context("closing event store")?;
    Ok(())
}
