//! CLI surface, grounded on the teacher's sibling services' `args.rs`
//! (`clap::Parser` with `env` fallbacks for every flag so the broker can be
//! configured identically from a shell or a container's environment).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Ranch: a resource leasing broker.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Address the HTTP transport binds to.
    #[arg(long, env = "RANCH_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: SocketAddr,

    /// Address the Prometheus exporter binds to.
    #[arg(long, env = "RANCH_METRICS_ADDR", default_value = "0.0.0.0:9090")]
    pub metrics_addr: SocketAddr,

    /// Path to the declarative pool config (YAML).
    #[arg(long, env = "RANCH_CONFIG_PATH")]
    pub config_path: PathBuf,

    /// How often the lease reaper sweeps for overdue leases.
    #[arg(long, env = "RANCH_REAPER_INTERVAL", default_value = "30s", value_parser = parse_duration)]
    pub reaper_interval: Duration,

    /// How often the request-queue GC sweeps for stale entries.
    #[arg(long, env = "RANCH_GC_INTERVAL", default_value = "60s", value_parser = parse_duration)]
    pub gc_interval: Duration,

    /// Age at which a queued request loses priority to any fresher request
    /// behind it in the same queue.
    #[arg(long, env = "RANCH_REQUEST_TTL", default_value = "30s", value_parser = parse_duration)]
    pub request_ttl: Duration,

    /// Log output format.
    #[arg(long, env = "RANCH_LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

fn parse_duration(raw: &str) -> Result<Duration, String> {
    humantime::parse_duration(raw).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_required_args() {
        let cli = Cli::parse_from(["ranch-server", "--config-path", "ranch.yaml"]);
        assert_eq!(cli.config_path, PathBuf::from("ranch.yaml"));
        assert_eq!(cli.reaper_interval, Duration::from_secs(30));
        assert_eq!(cli.log_format, LogFormat::Pretty);
    }

    #[test]
    fn overrides_intervals_from_flags() {
        let cli = Cli::parse_from([
            "ranch-server",
            "--config-path",
            "ranch.yaml",
            "--reaper-interval",
            "10s",
            "--request-ttl",
            "1m",
        ]);
        assert_eq!(cli.reaper_interval, Duration::from_secs(10));
        assert_eq!(cli.request_ttl, Duration::from_secs(60));
    }
}
