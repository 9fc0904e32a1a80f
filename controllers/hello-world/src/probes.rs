//! Health, readiness and metrics HTTP endpoints
//!
//! - `GET /healthz`: 200 while the process is running
//! - `GET /readyz`: 200 once the controller has started, 503 before
//! - `GET /metrics`: Prometheus text exposition

use crate::error::ControllerError;
use crate::metrics::Metrics;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Build the probe router; `ready` flips `/readyz` to 200
pub fn probe_routes(ready: Arc<AtomicBool>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(ready)
        .layer(TraceLayer::new_for_http())
}

/// Build the metrics router
pub fn metrics_routes(metrics: Metrics) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(metrics)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(ready): State<Arc<AtomicBool>>) -> (StatusCode, &'static str) {
    if ready.load(Ordering::SeqCst) {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "controller not started")
    }
}

async fn render_metrics(State(metrics): State<Metrics>) -> impl IntoResponse {
    match metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Bind `addr` up front so a taken port fails startup instead of a background task
pub async fn bind(addr: SocketAddr, name: &str) -> Result<TcpListener, ControllerError> {
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!(addr = %addr, error = %e, "Failed to bind {} endpoint", name);
        e
    })?;
    info!(addr = %addr, "{} endpoint listening", name);
    Ok(listener)
}

/// Serve `router` on `listener` until the server fails
pub async fn serve(listener: TcpListener, router: Router) -> Result<(), ControllerError> {
    axum::serve(listener, router).await?;
    Ok(())
}
