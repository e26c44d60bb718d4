//! `GET /api/connections` — snapshot of the [`crate::registry::ConnectionRegistry`].

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use crate::AppState;

#[derive(Serialize)]
struct ConnectionView {
    session: String,
    remote_ip: String,
    connected: u64,
}

/// `GET /api/connections` — returns the registry snapshot as a JSON array of
/// `{session, remote_ip, connected}` objects (spec §6).
pub async fn list_connections(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.registry.snapshot().await;
    let connections: Vec<ConnectionView> = snapshot
        .into_iter()
        .map(|c| ConnectionView {
            session: c.session,
            remote_ip: c.remote_addr.to_string(),
            connected: c.connected_at,
        })
        .collect();
    Json(serde_json::to_value(connections).unwrap_or_else(|_| serde_json::json!([])))
}
