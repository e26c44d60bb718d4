#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # palmux
//!
//! Web gateway that attaches a browser terminal to a tmux session over
//! WebSocket.
//!
//! palmux exposes HTTP/WS endpoints that let a pre-authenticated client
//! attach to (and view/drive) a named tmux session through a PTY-backed
//! bridge, with per-session connection admission limits and idempotent
//! teardown on disconnect.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{middleware, routing::get, Extension, Router};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use palmux::bridge::BridgeConfig;
use palmux::executor::{Executor, TmuxExecutor};
use palmux::{auth, routes, AppState, ApiKey, Config, ConnectionRegistry, SessionManager};

/// Web gateway that attaches a browser terminal to a tmux session over WebSocket.
#[derive(Parser)]
#[command(name = "palmux", version)]
struct Cli {
    /// Path to TOML config file.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    run_server(cli.config.as_deref()).await;
}

#[allow(clippy::too_many_lines)]
async fn run_server(config_path: Option<&str>) {
    let config = Config::load(config_path);

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    if let Err(err) = config.validate() {
        tracing::error!("Config error: {err}");
        std::process::exit(1);
    }

    info!("palmux v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}", config.server.listen);

    if config.auth.api_key == "change-me" {
        warn!("Using default API key — set PALMUX_API_KEY or update config");
    }

    let executor: Arc<dyn Executor> = Arc::new(TmuxExecutor::new(config.tmux.binary.clone()));
    let session_manager = Arc::new(SessionManager::new(
        executor,
        config.tmux.binary.clone(),
        config.tmux.session_marker.clone(),
    ));

    // Cleanup of stale groups at startup: a previous crash may have left
    // grouped sessions behind with no bridge left to claim them.
    let destroyed = session_manager.cleanup_grouped_sessions().await;
    if destroyed > 0 {
        info!("Destroyed {destroyed} stale grouped session(s) from a previous run");
    }

    let registry = ConnectionRegistry::new(config.server.max_connections_per_session);
    let bridge_config = BridgeConfig {
        read_frame_cap_bytes: config.server.read_frame_cap_bytes,
        pty_read_chunk_bytes: config.server.pty_read_chunk_bytes,
        keepalive_interval: Duration::from_secs(config.server.keepalive_interval_secs),
        window_watch_interval: Duration::from_secs(config.server.window_watch_interval_secs),
        child_term_grace: Duration::from_secs(config.server.child_term_grace_secs),
    };
    let shutdown = CancellationToken::new();

    let state = AppState {
        config: Arc::new(config),
        start_time: Instant::now(),
        session_manager,
        registry,
        bridge_config,
        shutdown: shutdown.clone(),
    };

    let public_routes = Router::new().route("/api/health", get(routes::health::health));

    let attach_routes = Router::new()
        .route(
            "/api/sessions/{session}/attach",
            get(routes::attach::attach_default_window),
        )
        .route(
            "/api/sessions/{session}/windows/{index}/attach",
            get(routes::attach::attach_window),
        );

    let authed_routes = Router::new()
        .route("/api/connections", get(routes::connections::list_connections))
        .layer(middleware::from_fn(auth::require_api_key));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
        ]);

    let app = Router::new()
        .merge(public_routes)
        .merge(attach_routes)
        .merge(authed_routes)
        .layer(Extension(ApiKey(state.config.auth.api_key.clone())))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let listener = TcpListener::bind(&state.config.server.listen)
        .await
        .expect("Failed to bind");

    info!("Server ready");

    let shutdown_signal = {
        let shutdown = shutdown.clone();
        async move {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                let mut sigterm =
                    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                        .expect("Failed to register SIGTERM");
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            #[cfg(not(unix))]
            {
                ctrl_c.await.ok();
                info!("Received SIGINT");
            }
            shutdown.cancel();
        }
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await
    .expect("Server error");

    info!("Shutting down...");
}
