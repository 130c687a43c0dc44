//! Operational HTTP endpoint: `/health` and `/metrics`.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use forge_telemetry::Metrics;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::AppResult;

#[derive(Clone)]
struct HealthState {
    worker: &'static str,
}

pub fn router(worker: &'static str) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(HealthState { worker })
}

async fn health(State(state): State<HealthState>) -> impl IntoResponse {
    (StatusCode::OK, format!("ok {}\n", state.worker))
}

async fn metrics() -> Response {
    match Metrics::render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Bind `0.0.0.0:port` and serve until `shutdown`.
pub async fn serve(worker: &'static str, port: u16, shutdown: CancellationToken) -> AppResult<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    serve_on(listener, worker, shutdown).await
}

/// Serve on an already bound listener until `shutdown`.
pub async fn serve_on(
    listener: TcpListener,
    worker: &'static str,
    shutdown: CancellationToken,
) -> AppResult<()> {
    info!(addr = %listener.local_addr()?, worker, "Health endpoint listening");
    axum::serve(listener, router(worker))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}
