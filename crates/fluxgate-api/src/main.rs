//! fluxgate server binary
//!
//! Read-only HTTP API over an InfluxDB v2 bucket.
//!
//! # Usage
//!
//! ```bash
//! # With config file
//! fluxgate --config config.yaml
//!
//! # With environment variables only
//! FLUXGATE_INFLUXDB__TOKEN=secret FLUXGATE_INFLUXDB__HOST=influx fluxgate
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tokio::signal;
use tracing::info;

use fluxgate_api::http::{create_router, create_router_with_observability, AppState};
use fluxgate_api::middleware::{apply_request_layers, RequestMetrics};
use fluxgate_api::observability::{init_logging, init_metrics, LoggingConfig};
use fluxgate_server::{QueryService, ServerConfig};

/// fluxgate - validated Flux queries over HTTP
#[derive(Parser, Debug)]
#[command(name = "fluxgate")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match args.config {
        Some(path) => ServerConfig::load(&path)?,
        None => ServerConfig::from_env()?,
    };

    init_logging(LoggingConfig::from(&config.logging));

    info!(version = env!("CARGO_PKG_VERSION"), "Starting fluxgate");
    info!(influxdb = ?config.influxdb, "InfluxDB settings");

    let service = QueryService::from_settings(&config.influxdb)?;
    let state = AppState::new(service.clone());

    let router = if config.metrics.enabled {
        let metrics_state = init_metrics()?;
        info!("Metrics enabled at /metrics");
        create_router_with_observability(state, metrics_state)
    } else {
        create_router(state)
    };
    let router = apply_request_layers(router, Arc::new(RequestMetrics::new()));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let result = run_http_server(router, addr).await;

    // Runs on every exit path so pooled connections are closed
    service.cleanup().await;
    info!("Shutdown complete");
    result
}

/// Run the HTTP server until a shutdown signal arrives.
async fn run_http_server(router: Router, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
