//! `GET /api/sessions/{session}/windows/{index}/attach` (and the
//! index-less `GET /api/sessions/{session}/attach`, which defaults
//! `index` to `-1`) — admits, upgrades, resolves the target, constructs a
//! bridge, and guarantees cleanup on every failure branch (spec §4.E).
//!
//! Grounded on the teacher's `ws::ws_upgrade` (token check before upgrade)
//! and `routes::sessions` (typed, scoped-acquisition error responses).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message};
use axum::extract::{ConnectInfo, Path, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::SinkExt;
use serde::Deserialize;
use tracing::warn;

use crate::bridge;
use crate::registry::ConnectionRegistry;
use crate::sessions::SessionManager;
use crate::AppState;

/// Close code sent when the attach path fails after the socket is already
/// upgraded. 1011 ("Internal Error") per RFC 6455 §7.4.1 — the client did
/// nothing wrong, the server just couldn't complete the attach.
const CLOSE_ATTACH_FAILED: u16 = 1011;

/// Releases the registry slot and destroys the grouped session created for
/// this attempt, unless [`CleanupGuard::disarm`] has been called first.
///
/// `ws.on_upgrade`'s callback is only invoked once hyper's upgrade future
/// resolves `Ok`; if the client disconnects or a proxy drops the handshake
/// mid-flight, that future resolves `Err` and the callback — along with
/// everything it captured by `move` — is dropped without ever running. This
/// guard is captured into the callback closure for exactly that reason: its
/// `Drop` impl fires either way, so admission and the grouped session it
/// paid for are never leaked on that path (spec §4.E step 4, property P2).
struct CleanupGuard {
    armed: bool,
    conn_id: String,
    group_name: String,
    registry: ConnectionRegistry,
    session_manager: Arc<SessionManager>,
}

impl CleanupGuard {
    /// Call once the bridge (or an explicit failure branch) has taken over
    /// responsibility for releasing these resources.
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let conn_id = std::mem::take(&mut self.conn_id);
        let group_name = std::mem::take(&mut self.group_name);
        let registry = self.registry.clone();
        let session_manager = Arc::clone(&self.session_manager);
        tokio::spawn(async move {
            warn!("attach {conn_id}: upgrade never completed, releasing admission and grouped session {group_name}");
            registry.release(&conn_id).await;
            session_manager.destroy_grouped_session(&group_name).await;
        });
    }
}

/// Query parameters accepted by both attach endpoints.
#[derive(Deserialize)]
pub struct AttachQuery {
    /// Pre-shared API key (browsers cannot set an `Authorization` header on a
    /// WebSocket upgrade request, so the token travels in the query string).
    pub token: String,
}

/// `GET /api/sessions/{session}/windows/{index}/attach`
pub async fn attach_window(
    state: State<AppState>,
    Path((session, index)): Path<(String, String)>,
    query: Query<AttachQuery>,
    connect_info: ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    let window_index = index.parse().unwrap_or(-1);
    attach_inner(state, session, window_index, query, connect_info, ws).await
}

/// `GET /api/sessions/{session}/attach` — no window index given.
pub async fn attach_default_window(
    state: State<AppState>,
    Path(session): Path<String>,
    query: Query<AttachQuery>,
    connect_info: ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    attach_inner(state, session, -1, query, connect_info, ws).await
}

async fn attach_inner(
    State(state): State<AppState>,
    session: String,
    window_index: i32,
    Query(query): Query<AttachQuery>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    // Step 1: validate the token before admission or upgrade.
    if !crate::auth::constant_time_eq(state.config.auth.api_key.as_bytes(), query.token.as_bytes())
    {
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    }

    // Step 2: admit *before* upgrading.
    let Some(conn_id) = state.registry.admit(&session, remote.ip()).await else {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            "too many attachments for this session",
        )
            .into_response();
    };

    // Step 3: every user session is grouped, so concurrent viewers each get
    // an independent current-window state (spec §4.E.3: "in the reference
    // design: every user session").
    let group_name = match state.session_manager.create_grouped_session(&session).await {
        Ok(name) => name,
        Err(e) => {
            warn!("attach: failed to create grouped session for {session}: {e}");
            state.registry.release(&conn_id).await;
            return (StatusCode::BAD_GATEWAY, format!("attach failed: {e}")).into_response();
        }
    };

    let session_manager = Arc::clone(&state.session_manager);
    let registry = state.registry.clone();
    let bridge_config = state.bridge_config;
    let shutdown = state.shutdown.clone();

    // Armed for the lifetime of the upgrade attempt. If hyper's upgrade
    // future never resolves `Ok` the closure below is dropped unused, and
    // this guard's `Drop` impl releases what was admitted above; if the
    // closure does run, every branch inside disarms it before returning.
    let mut guard = CleanupGuard {
        armed: true,
        conn_id: conn_id.clone(),
        group_name: group_name.clone(),
        registry: registry.clone(),
        session_manager: Arc::clone(&session_manager),
    };

    ws.on_upgrade(move |mut socket| async move {
        // Step 5: attach the grouped session under a fresh PTY.
        let handle = match session_manager
            .attach(&group_name, window_index, Some(group_name.clone()))
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!("attach: SessionManager::attach failed for {group_name}: {e}");
                guard.disarm();
                registry.release(&conn_id).await;
                session_manager.destroy_grouped_session(&group_name).await;
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_ATTACH_FAILED,
                        reason: format!("attach failed: {e}").into(),
                    })))
                    .await;
                return;
            }
        };

        // Step 6: hand off to the bridge. It owns cleanup from here.
        guard.disarm();
        bridge::run(
            handle,
            socket,
            conn_id,
            session,
            registry,
            session_manager,
            bridge_config,
            shutdown,
        )
        .await;
    })
}
