//! Route Configuration
//!
//! The operational routes (health, metrics) use [`AppState`]; the hub routes
//! carry their own [`WsState`] and are merged in only when the process runs
//! the WebSocket server.

use axum::{
    response::IntoResponse,
    routing::{get, post},
    Router,
};

use super::handlers;
use crate::infrastructure::metrics;
use crate::presentation::websocket::{ws_handler, WsState};
use crate::startup::AppState;

/// Create the main router
pub fn create_router(state: AppState, ws: Option<WsState>) -> Router {
    let router = Router::new()
        .route("/health/live", get(handlers::health::liveness))
        .route("/health/ready", get(handlers::health::readiness))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    match ws {
        Some(ws) => router.merge(ws_routes(ws)),
        None => router,
    }
}

/// WebSocket upgrade, broadcast intake and hub liveness.
pub fn ws_routes(state: WsState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/ws/broadcast", post(handlers::hub::broadcast))
        .route("/api/ws/health", get(handlers::hub::hub_health))
        .with_state(state)
}

/// Prometheus metrics endpoint handler
async fn metrics_handler() -> impl IntoResponse {
    let metrics = metrics::gather_metrics();
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        metrics,
    )
}
