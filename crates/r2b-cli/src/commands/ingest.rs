//! Ingest command implementation.

use crate::server::{start_server, ServerState};
use anyhow::Result;
use r2b_core::engine::{IngestionEngine, LineSource, ShutdownHandle};
use r2b_core::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Run the ingestion engine over stdin or `input`.
pub async fn run(config: Config, input: Option<PathBuf>, serve_http: bool) -> Result<()> {
    info!(
        location = %config.storage.location,
        flush_interval_s = config.buffer.flush_interval_seconds,
        max_lines_per_flush = config.buffer.max_lines_per_flush,
        "Starting ingestion engine"
    );

    let health_port = config.monitoring.health_port;
    let engine = Arc::new(IngestionEngine::new(config)?);
    let shutdown = engine.shutdown_handle();

    let server = if serve_http {
        let state = Arc::new(ServerState {
            engine: Arc::clone(&engine),
        });
        Some(tokio::spawn(start_server(
            state,
            health_port,
            shutdown.clone(),
        )))
    } else {
        None
    };

    tokio::spawn(wait_for_signal(shutdown.clone()));

    let result = match input {
        Some(path) => {
            let source = LineSource::open(&path).await?;
            engine.run(source).await
        }
        None => engine.run(LineSource::stdin()).await,
    };

    // The engine triggers shutdown on its own exit; this wakes the server too.
    shutdown.trigger();
    if let Some(server) = server {
        let _ = server.await;
    }

    let metrics = engine.metrics();
    info!(
        records_ingested = metrics.records_ingested_total(),
        records_flushed = metrics.records_flushed_total(),
        records_dropped = metrics.records_dropped_total(),
        flushes = metrics.flushes_total(),
        "Ingestion engine stopped"
    );

    result?;
    Ok(())
}

/// Trigger shutdown on SIGINT or SIGTERM.
async fn wait_for_signal(shutdown: ShutdownHandle) {
    #[cfg(unix)]
    {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler, relying on Ctrl+C");
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                    shutdown.trigger();
                }
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, initiating graceful shutdown");
    }

    shutdown.trigger();
}
