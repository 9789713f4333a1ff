//! Integration gateway
//!
//! # Architecture Overview
//!
//! ```text
//!   POST /v1/invoke ──▶ caller key check ──▶ RequestPipeline
//!                         │
//!                         ├─ cache (TTL + LRU, cacheable GETs)
//!                         └─ retry policy
//!                              ├─ rate limiter (provider, user)
//!                              └─ circuit breaker (provider:operation)
//!                                   └─ timeout
//!                                        ├─ auth (token manager / system key)
//!                                        └─ HTTPS call → classify ──▶ Provider API
//!
//!   /admin/* ──▶ limiter, breaker, cache and token snapshots and controls
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use integration_gateway::auth::InMemoryCredentialStore;
use integration_gateway::config::{load_config, GatewayConfig};
use integration_gateway::lifecycle::{signals, spawn_cache_sweeper, Gateway, Shutdown};
use integration_gateway::observability::{logging, metrics};
use integration_gateway::HttpServer;

#[derive(Parser)]
#[command(name = "integration-gateway")]
#[command(about = "Resilient outbound API gateway for third-party integrations", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = if args.config.exists() {
        load_config(&args.config)?
    } else {
        eprintln!("config file {} not found, using defaults", args.config.display());
        GatewayConfig::default()
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "integration-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        providers = config.providers.len(),
        request_timeout_ms = config.timeouts.request_ms,
        "Configuration loaded"
    );
    if config.invoke.api_keys.is_empty() {
        tracing::warn!("No invoke.api_keys configured; every /v1/invoke call will be rejected");
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let store = Arc::new(match &config.credentials.path {
        Some(path) => InMemoryCredentialStore::load_from_file(path)?,
        None => InMemoryCredentialStore::new(None),
    });

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let sweep_every = Duration::from_secs(config.cache.sweep_interval_secs);

    let gateway = Gateway::build(config, store.clone())?;
    let shutdown = Shutdown::new();
    signals::spawn_signal_listener(shutdown.clone());
    let sweeper = spawn_cache_sweeper(gateway.context.clone(), sweep_every, shutdown.clone());

    HttpServer::new(&gateway).run(listener, shutdown.clone()).await?;

    shutdown.trigger();
    let _ = sweeper.await;
    if let Err(e) = store.save_to_file() {
        tracing::error!(error = %e, "Failed to save credentials");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
