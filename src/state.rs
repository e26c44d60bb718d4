//! Shared application state passed to every handler via Axum's `State` extractor.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::bridge::BridgeConfig;
use crate::config::Config;
use crate::registry::ConnectionRegistry;
use crate::sessions::SessionManager;

/// Shared application state for the palmux server.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Monotonic instant when the server started (for uptime calculation).
    pub start_time: Instant,
    /// Wraps the `Executor` to offer session CRUD and attach-spawn.
    pub session_manager: Arc<SessionManager>,
    /// Process-wide map of live attachments with per-session admission.
    pub registry: ConnectionRegistry,
    /// Tunables handed to every `AttachBridge`, derived once from `config`.
    pub bridge_config: BridgeConfig,
    /// Cancelled once by `main` when a graceful shutdown begins. Every live
    /// bridge watches this alongside its own four loops, so shutdown reuses
    /// the same idempotent teardown every other exit path uses.
    pub shutdown: CancellationToken,
}
