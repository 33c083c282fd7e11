//! Scan dashboard gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!     Browser                 ┌──────────────────────────────────────┐
//!     ───────────────────────▶│  http::server   (prefix match, 405)  │
//!                             │        │                             │
//!                             │        ▼                             │
//!                             │  http::request  (strip host/conn,    │
//!                             │                  default accept,     │
//!                             │                  opaque body)        │
//!                             │        │                             │
//!                             │        ▼                             │
//!                             │  hyper client ──────────────────────┼──▶ Upstream
//!                             │        │                             │     API
//!     ◀───────────────────────│  http::response (verbatim relay) ◀──┼───
//!                             └──────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use scan_gateway::config::loader::{apply_env_overrides, load_config};
use scan_gateway::config::validation::validate_config;
use scan_gateway::config::{ConfigError, GatewayConfig};
use scan_gateway::http::GatewayServer;
use scan_gateway::lifecycle::{signals, Shutdown};
use scan_gateway::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "scan-gateway")]
#[command(about = "Pass-through gateway between the scan dashboard and its backend", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override listener.bind_address.
    #[arg(long)]
    bind: Option<String>,

    /// Override upstream.authority.
    #[arg(long)]
    upstream: Option<String>,
}

fn resolve_config(cli: &Cli) -> Result<GatewayConfig, ConfigError> {
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    let mut config = apply_env_overrides(config)?;
    if let Some(bind) = &cli.bind {
        config.listener.bind_address = bind.clone();
    }
    if let Some(upstream) = &cli.upstream {
        config.upstream.authority = upstream.clone();
    }
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    logging::init_logging(&config.observability.log_level);

    tracing::info!("scan-gateway v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.authority,
        prefix = %config.upstream.path_prefix,
        max_body_bytes = ?config.limits.max_body_bytes,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server = GatewayServer::new(config)?;
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        signals::wait_for_signal().await;
        shutdown.trigger();
    });

    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
