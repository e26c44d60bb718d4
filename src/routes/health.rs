//! Unauthenticated health-check endpoint.

use axum::{extract::State, Json};
use serde_json::{json, Value};
use tracing::warn;

use crate::AppState;

/// `GET /api/health` — liveness probe.
///
/// Returns status, uptime, version, and a count of live (non-grouped) user
/// sessions. No authentication required, suitable for load-balancer health
/// checks.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let uptime = state.start_time.elapsed().as_secs();
    let sessions = match state.session_manager.list_sessions().await {
        Ok(sessions) => sessions.len(),
        Err(e) => {
            warn!("health: list_sessions failed: {e}");
            0
        }
    };

    Json(json!({
        "status": "ok",
        "uptime_secs": uptime,
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": sessions,
        "connections": state.registry.snapshot().await.len(),
    }))
}
