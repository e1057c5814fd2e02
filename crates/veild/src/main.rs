//! veild: veil snippet daemon
//!
//! Usage:
//!   veild [--config /etc/veil/config.toml] [--listen 0.0.0.0:8787]
//!
//! Serves the snippet API (`POST /api/snippets`, `GET /api/snippets/{id}`)
//! plus `/metrics` and `/healthz`.

mod api;
mod daemon;
mod metrics;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::{info, warn};
use veil_core::config::VeilConfig;

#[derive(Parser, Debug)]
#[command(name = "veild", version, about = "veil snippet daemon")]
struct Cli {
    /// Path to veil.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "VEIL_CONFIG",
        default_value = "/etc/veil/config.toml"
    )]
    config: PathBuf,

    /// Override the listen address from the config file
    #[arg(long, env = "VEIL_LISTEN")]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error); overrides daemon.log_level
    #[arg(long, env = "VEIL_LOG")]
    log: Option<String>,

    /// Log format (json, text); overrides daemon.log_format
    #[arg(long, env = "VEIL_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // config first: it may carry the log settings
    let config_found = cli.config.exists();
    let mut config = if config_found {
        VeilConfig::load(&cli.config)?
    } else {
        VeilConfig::default()
    };

    let level = cli
        .log
        .clone()
        .unwrap_or_else(|| config.daemon.log_level.clone());
    let format = cli
        .log_format
        .clone()
        .or_else(|| <LogFormat as ValueEnum>::from_str(&config.daemon.log_format, true).ok())
        .unwrap_or(LogFormat::Text);
    init_logging(&level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "veild starting"
    );
    if !config_found {
        warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }

    if let Some(listen) = cli.listen {
        config.daemon.listen = listen;
    }

    daemon::run(config).await
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
