//! Query gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────────┐
//!                        │                  QUERY GATEWAY                   │
//!   Client request       │  ┌────────┐   ┌──────────────┐   ┌────────────┐  │
//!   ─────────────────────┼─▶│  http  │──▶│   routing    │──▶│  weighted  │  │
//!                        │  │ server │   │  (affinity)  │   │   table    │  │
//!                        │  └───┬────┘   └──────────────┘   └─────▲──────┘  │
//!                        │      │ on_response                      │         │
//!                        │      ▼                                  │ rebuild │
//!                        │  ┌────────┐   ┌──────────────┐   ┌─────┴──────┐  │     Query engine
//!                        │  │ cache  │◀──│ continuation │   │   health   │◀─┼──── clusters
//!                        │  │        │   │    poller    │──▶│  monitor   │  │
//!                        │  └────────┘   └──────────────┘   └────────────┘  │
//!                        │                                                  │
//!                        │  config · registry · lifecycle · observability   │
//!                        └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use query_gateway::config::loader::load_config;
use query_gateway::lifecycle::wait_for_shutdown_signal;
use query_gateway::observability::logging;
use query_gateway::{Gateway, GatewayConfig};

#[derive(Parser)]
#[command(name = "query-gateway")]
#[command(about = "High-availability gateway for query-engine clusters", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload cluster membership when the configuration file changes.
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    logging::init(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        backends = config.backends.len(),
        "query-gateway starting"
    );

    let mut gateway = Gateway::start(config).await?;
    if let (true, Some(path)) = (args.watch, &args.config) {
        gateway.watch_config(path)?;
    }

    tokio::select! {
        _ = wait_for_shutdown_signal() => {}
        _ = gateway.wait() => {}
    }
    gateway.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
