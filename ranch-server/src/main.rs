//! Ranch server: wraps `ranch-core`'s state machine with an HTTP transport,
//! a config-file watcher, a Prometheus exporter, and graceful shutdown.
//!
//! Follows the teacher's deferred-startup shape (`network/module.rs`):
//! build shared state, bootstrap-reconcile (fatal on failure), spawn
//! background sweeps, then serve until a shutdown signal.

mod args;
mod config_watch;
mod http;
mod shutdown;
mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use ranch_core::{MemoryStorage, Ranch, SystemClock};

use crate::args::Cli;
use crate::config_watch::ConfigWatcher;
use crate::http::{build_router, AppState};
use crate::shutdown::ShutdownController;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_logging(cli.log_format);

    if let Err(err) = run(cli).await {
        error!(%err, "ranch-server exited with error");
        return Err(err);
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_text = std::fs::read_to_string(&cli.config_path)
        .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", cli.config_path.display()))?;
    let config: ranch_core::RanchConfig = serde_yaml::from_str(&config_text)?;

    let ranch = Arc::new(Ranch::new(
        Arc::new(MemoryStorage::new()),
        Arc::new(SystemClock),
    ));

    // Initial reconciliation failure is fatal at startup: never serve
    // traffic against a pool whose declared config we failed to apply.
    let report = ranch.bootstrap(&config)?;
    info!(?report, "bootstrap reconciliation complete");

    telemetry::install_metrics_exporter(cli.metrics_addr)?;

    let shutdown = Arc::new(ShutdownController::new());

    let reaper_handle = tokio::spawn(ranch_core::reaper::run(ranch.clone(), cli.reaper_interval));
    let gc_handle = tokio::spawn(ranch_core::gc::run(
        ranch.clone(),
        cli.gc_interval,
        chrono::Duration::from_std(cli.request_ttl).unwrap_or_default(),
    ));
    let watcher_handle = spawn_config_watcher(ranch.clone(), cli.config_path.clone());
    let metrics_handle = tokio::spawn(sample_metrics(ranch.clone(), shutdown.shutdown_receiver()));

    let state = AppState {
        ranch: ranch.clone(),
        shutdown: shutdown.clone(),
        request_ttl: chrono::Duration::from_std(cli.request_ttl).unwrap_or_default(),
    };
    let router = build_router(state);

    let listener = TcpListener::bind(cli.listen_addr).await?;
    info!(addr = %cli.listen_addr, "listening");
    shutdown.set_ready();

    let shutdown_signal = {
        let shutdown = shutdown.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            shutdown.trigger_shutdown();
        }
    };

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    if !shutdown.wait_for_drain(Duration::from_secs(30)).await {
        warn!("drain timeout expired with requests still in flight");
    }

    reaper_handle.abort();
    gc_handle.abort();
    watcher_handle.abort();
    metrics_handle.abort();
    Ok(())
}

/// Publishes `ranch_pool_size` gauges every 10s until shutdown is signalled.
async fn sample_metrics(ranch: Arc<Ranch>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(10));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                telemetry::record_pool_snapshots(&ranch.all_metric_snapshots());
            }
            _ = shutdown.changed() => return,
        }
    }
}

/// Polls the config file every second and re-reconciles on change. A
/// malformed edit is logged and skipped -- the previously reconciled pool
/// stays live rather than partially applying a rejected document.
fn spawn_config_watcher(
    ranch: Arc<Ranch>,
    config_path: std::path::PathBuf,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let watcher = match ConfigWatcher::new(&config_path) {
            Ok(w) => w,
            Err(err) => {
                warn!(%err, "config watcher failed to start; hot-reload disabled");
                return;
            }
        };
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            if !watcher.poll() {
                continue;
            }
            match std::fs::read_to_string(&config_path).and_then(|text| {
                serde_yaml::from_str::<ranch_core::RanchConfig>(&text)
                    .map_err(std::io::Error::other)
            }) {
                Ok(config) => match ranch.reconcile(&config) {
                    Ok(report) => info!(?report, "config reconciled after file change"),
                    Err(err) => warn!(%err, "rejected updated config, prior pool retained"),
                },
                Err(err) => warn!(%err, "failed to parse updated config, prior pool retained"),
            }
        }
    })
}
