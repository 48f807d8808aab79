//! Real-time aggregation service.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ http (request id, trace, timeout, rate limit, API key)
//!                  │
//!                  ▼
//!             aggregator ──▶ cache (SWR, in-flight dedup, bounded revalidation)
//!                  │
//!                  ▼ per source, concurrently
//!             circuit breaker ──▶ fetcher (retry, backoff, deadline) ──▶ upstream
//!                  │
//!                  ▼
//!             persistence (records upsert, audit log)
//!
//!     scheduler ──▶ aggregator (same cache, same breakers)
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use realtime_aggregator::config::load_config;
use realtime_aggregator::lifecycle::{shutdown_on_signal, Shutdown};
use realtime_aggregator::observability::{logging, metrics};
use realtime_aggregator::HttpServer;

#[derive(Parser)]
#[command(name = "realtime-aggregator", version)]
#[command(about = "Read-through aggregation service over JSON sources", long_about = None)]
struct Args {
    /// TOML configuration file. Environment variables override it.
    #[arg(short, long, env = "AGGREGATOR_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "realtime-aggregator starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        sources = config.sources.len(),
        request_timeout_secs = config.timeouts.request_secs,
        rate_limit_enabled = config.rate_limit.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = HttpServer::new(config)?;

    let shutdown = Shutdown::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    server.run(listener, &shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
