//! HTTP server for health and metrics endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use r2b_core::engine::{IngestionEngine, ShutdownHandle};
use r2b_core::health::HealthStatus;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// Shared state for HTTP endpoints.
pub struct ServerState {
    pub engine: Arc<IngestionEngine>,
}

/// Build the router serving `/health`, `/healthz`, `/readyz` and `/metrics`.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serve until `shutdown` fires.
pub async fn start_server(state: Arc<ServerState>, port: u16, shutdown: ShutdownHandle) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, port, "Failed to bind health server");
            return;
        }
    };

    info!(port, "Health server started");

    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.triggered().await })
        .await;

    match result {
        Ok(()) => info!("Health server shut down"),
        Err(e) => error!(error = %e, "Health server error"),
    }
}

/// Status report: buffer counters, thresholds, component health.
async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let report = state.engine.status();

    let status_code = match report.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(report))
}

/// Kubernetes liveness probe handler.
async fn healthz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    // Liveness: Is the process alive?
    let is_alive = state.engine.health().overall_status() != HealthStatus::Unhealthy;

    if is_alive {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Kubernetes readiness probe handler.
async fn readyz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    // Readiness: engine loop running and not unhealthy
    let health = state.engine.health();
    if health.is_running() && health.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Prometheus metrics endpoint handler.
async fn metrics_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.engine.metrics_text(),
    )
}
