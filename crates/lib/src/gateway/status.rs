//! Status HTTP endpoint: liveness, connection state, and the pending pairing QR.

use crate::router::Router;
use crate::supervisor::SupervisorStatus;
use anyhow::{Context, Result};
use axum::{extract::State, routing::get, Json};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Shared state for the status handlers.
#[derive(Clone)]
pub struct StatusState {
    status: watch::Receiver<SupervisorStatus>,
    router: Arc<Router>,
}

impl StatusState {
    pub fn new(status: watch::Receiver<SupervisorStatus>, router: Arc<Router>) -> Self {
        Self { status, router }
    }
}

/// Routes: `GET /` and `GET /qr`.
pub fn status_router(state: StatusState) -> axum::Router {
    axum::Router::new()
        .route("/", get(health_http))
        .route("/qr", get(qr_http))
        .with_state(state)
}

/// Serve the status routes on `listener` until `shutdown` completes.
pub async fn serve_status<F>(listener: TcpListener, state: StatusState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, status_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("status server exited")
}

/// GET / returns a simple health JSON for liveness checks.
async fn health_http(State(state): State<StatusState>) -> Json<serde_json::Value> {
    let connection = state.status.borrow().connection;
    Json(json!({
        "runtime": "running",
        "connection": connection,
        "activeSessions": state.router.active_sessions(),
    }))
}

/// GET /qr returns the pairing challenge while one is pending, otherwise null.
async fn qr_http(State(state): State<StatusState>) -> Json<serde_json::Value> {
    let qr = state.status.borrow().qr.clone();
    Json(json!({ "qr": qr }))
}
