//! http-connector
//!
//! Serves the status responder behind a readiness-driven connection
//! controller.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────┐
//!                      │            controller thread (mio)           │
//!   Client ────────────┼─▶ listener ─▶ admission ─▶ pool ─▶ protocol  │
//!                      │      ▲            ▲                   │     │
//!                      └──────┼────────────┼───────────────────┼─────┘
//!                             │            │                   │
//!                      startup gate   shared limits     pending gauge
//!                             │            │                   │
//!                      ┌──────┴────────────┴───────────────────┴─────┐
//!                      │        tokio runtime (this binary)          │
//!                      │  config watcher · ctrl-c · metrics exporter │
//!                      └─────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use http_connector::config::watcher::ConfigWatcher;
use http_connector::config::{load_config, ConnectorConfig};
use http_connector::http::status_factory;
use http_connector::net::admission::{shared_limits, LoadGauge, PendingRequestThreshold};
use http_connector::net::ServerConnectionController;
use http_connector::observability::{logging, metrics};

#[derive(Parser, Debug)]
#[command(name = "http-connector", version, about = "Readiness-driven HTTP connection controller")]
struct Args {
    /// Configuration file; watched for admission limit changes.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ConnectorConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability.log_level)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "http-connector starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_total_connections = config.limits.max_total_connections,
        max_pending_requests = config.limits.max_pending_requests,
        select_timeout_ms = config.controller.select_timeout_ms,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let limits = shared_limits(config.limits);
    let gauge = LoadGauge::new();
    let overload = Arc::new(PendingRequestThreshold::new(gauge.clone(), Arc::clone(&limits)));
    let protocols = status_factory(Some(gauge))?;

    let controller =
        ServerConnectionController::bind_with_limits(&config, limits, protocols, overload)?;
    let (handle, thread) = controller.spawn()?;

    let ready = {
        let handle = handle.clone();
        tokio::task::spawn_blocking(move || handle.await_ready()).await?
    };
    if ready {
        tracing::info!(address = %handle.local_addr(), "Server ready");
    }

    // Keep the watcher alive for the lifetime of the server.
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let guard = watcher.run()?;
            let handle = handle.clone();
            let bind_address = config.listener.bind_address.clone();
            tokio::spawn(async move {
                while let Some(reloaded) = updates.recv().await {
                    if reloaded.listener.bind_address != bind_address {
                        tracing::warn!(
                            bind_address = %reloaded.listener.bind_address,
                            "Listener changes require a restart, ignoring"
                        );
                    }
                    handle.update_limits(reloaded.limits);
                }
            });
            Some(guard)
        }
        None => None,
    };

    let mut joined = tokio::task::spawn_blocking(move || thread.join());

    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("Shutdown signal received");
            handle.shutdown();
            joined.await?
        }
        outcome = &mut joined => outcome?,
    };

    match outcome {
        Ok(Ok(())) => {
            tracing::info!(stats = ?handle.stats().snapshot(), "Shutdown complete");
            Ok(())
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Controller stopped with an error");
            Err(e.into())
        }
        Err(_) => Err("controller thread panicked".into()),
    }
}
