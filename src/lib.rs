#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! palmux library — exposes the building blocks of the attach engine for
//! use by the `palmux` binary.
//!
//! - `auth` — API key authentication middleware
//! - `bridge` — per-connection PTY/WebSocket bridge
//! - `config` — configuration loading
//! - `executor` — abstraction over invoking the multiplexer CLI
//! - `registry` — connection admission tracking
//! - `routes` — HTTP/WebSocket route handlers
//! - `sessions` — multiplexer session management (list/attach/grouped sessions)
//! - `shell` — PTY allocation and child-process plumbing
//! - `state` — shared application state

pub mod auth;
pub mod bridge;
pub mod config;
pub mod executor;
pub mod registry;
pub mod routes;
pub mod sessions;
pub mod shell;
pub mod state;

// Re-export key types at crate root for convenience.
pub use auth::ApiKey;
pub use config::Config;
pub use executor::{Executor, TmuxExecutor};
pub use registry::ConnectionRegistry;
pub use sessions::SessionManager;
pub use state::AppState;
