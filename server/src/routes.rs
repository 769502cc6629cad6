use std::sync::atomic::Ordering;

use axum::{extract::State, Json, Router};

use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the axum Router: the WebSocket endpoint plus the diagnostic HTTP
/// surface.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", axum::routing::get(ws_handler::ws_upgrade))
        .route("/health", axum::routing::get(health_check))
        .route("/api/status", axum::routing::get(status))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

/// GET /api/status — unauthenticated diagnostic counts. Not part of the
/// chat protocol.
async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "connections": state.connections.load(Ordering::Relaxed),
        "onlineUsers": state.presence.online_count(),
        "uptimeSecs": state.started_at.elapsed().as_secs(),
    }))
}
