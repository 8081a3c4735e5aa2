use std::net::SocketAddr;

use axum::{extract::State, routing::get, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: BoxError,
    },
    #[error("HTTP server failed: {0}")]
    Serve(#[source] BoxError),
}

#[derive(Clone)]
pub struct AppState {
    pub metrics: Option<PrometheusHandle>,
}

pub fn router(metrics: Option<PrometheusHandle>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .with_state(AppState { metrics })
}

/// Binds `addr` and serves until `shutdown` flips to true. A busy port is
/// returned as [`ServerError::Bind`].
pub fn spawn(
    addr: SocketAddr,
    metrics: Option<PrometheusHandle>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<Result<(), ServerError>>, ServerError> {
    let server = axum::Server::try_bind(&addr)
        .map_err(|e| ServerError::Bind { addr, source: e.into() })?
        .serve(router(metrics).into_make_service())
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        });
    tracing::info!(%addr, "Health endpoint listening");
    Ok(tokio::spawn(async move { server.await.map_err(|e| ServerError::Serve(e.into())) }))
}

/// Liveness only; the pipeline is not inspected.
async fn health() -> Json<Value> {
    Json(json!({ "status": "alive" }))
}

async fn render_metrics(State(state): State<AppState>) -> String {
    state.metrics.as_ref().map(PrometheusHandle::render).unwrap_or_default()
}
