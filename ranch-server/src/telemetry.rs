//! Structured logging and metrics exporter setup, grounded on the teacher's
//! own `tracing-subscriber` stack (`env-filter`, `fmt`) and its
//! `metrics`/`metrics-exporter-prometheus` dependency pair.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

use crate::args::LogFormat;

/// Initializes the global `tracing` subscriber. Falls back to `info` level
/// when `RUST_LOG` is unset.
pub fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Pretty => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}

/// Installs the Prometheus exporter as a standalone HTTP listener on
/// `addr`, serving `/metrics` for the scraper.
///
/// # Errors
///
/// Returns an error if the exporter cannot bind `addr`.
pub fn install_metrics_exporter(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus exporter: {e}"))
}

/// Publishes one [`ranch_core::PoolSnapshot`] per resource type as
/// `ranch_pool_size{resource_type,state}` gauges.
pub fn record_pool_snapshots(snapshots: &[ranch_core::PoolSnapshot]) {
    for snapshot in snapshots {
        for (state, count) in &snapshot.counts {
            metrics::gauge!(
                "ranch_pool_size",
                "resource_type" => snapshot.resource_type.clone(),
                "state" => state.clone(),
            )
            .set(*count as f64);
        }
    }
}
