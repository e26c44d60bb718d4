//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `PALMUX_API_KEY`, `PALMUX_LISTEN`
//! 2. **Config file** — path via `--config <path>`, or `palmux.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:7770"
//! max_connections_per_session = 5
//! read_frame_cap_bytes = 32768
//! pty_read_chunk_bytes = 4096
//! keepalive_interval_secs = 30
//! window_watch_interval_secs = 2
//! child_term_grace_secs = 3
//!
//! [tmux]
//! binary = "tmux"
//! session_marker = "_palmux_"
//!
//! [auth]
//! api_key = "your-secret-key"
//!
//! [logging]
//! level = "info"
//! ```

use std::path::Path;

use serde::Deserialize;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub tmux: TmuxConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server and bridge resource-limit settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:7770`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Per-session cap on concurrent attachments (spec §4.C, default 5).
    #[serde(default = "default_max_connections_per_session")]
    pub max_connections_per_session: usize,
    /// Largest incoming WebSocket text frame accepted (spec §4.D, default 32 KiB).
    #[serde(default = "default_read_frame_cap_bytes")]
    pub read_frame_cap_bytes: usize,
    /// Chunk size used by the PTY-reader loop (spec §4.D, default 4 KiB).
    #[serde(default = "default_pty_read_chunk_bytes")]
    pub pty_read_chunk_bytes: usize,
    /// Interval between application-level keepalive pings (default 30s).
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,
    /// Interval between client-window-watcher polls (default 2s).
    #[serde(default = "default_window_watch_interval_secs")]
    pub window_watch_interval_secs: u64,
    /// Grace period between SIGTERM and SIGKILL during teardown (default 3s).
    #[serde(default = "default_child_term_grace_secs")]
    pub child_term_grace_secs: u64,
}

/// Settings for invoking the multiplexer binary.
#[derive(Debug, Clone, Deserialize)]
pub struct TmuxConfig {
    /// Path or name of the multiplexer binary (default `tmux`).
    #[serde(default = "default_tmux_binary")]
    pub binary: String,
    /// Fixed prefix marking a session as an engine-owned grouped session.
    #[serde(default = "default_session_marker")]
    pub session_marker: String,
}

/// Authentication settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Pre-shared Bearer token, checked before the WebSocket upgrade.
    /// Override with `PALMUX_API_KEY`. Defaults to `"change-me"`, which
    /// triggers a startup warning.
    #[serde(default = "default_api_key")]
    pub api_key: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen() -> String {
    "0.0.0.0:7770".to_string()
}
fn default_max_connections_per_session() -> usize {
    5
}
fn default_read_frame_cap_bytes() -> usize {
    32 * 1024
}
fn default_pty_read_chunk_bytes() -> usize {
    4 * 1024
}
fn default_keepalive_interval_secs() -> u64 {
    30
}
fn default_window_watch_interval_secs() -> u64 {
    2
}
fn default_child_term_grace_secs() -> u64 {
    3
}
fn default_tmux_binary() -> String {
    "tmux".to_string()
}
fn default_session_marker() -> String {
    "_palmux_".to_string()
}
fn default_api_key() -> String {
    "change-me".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections_per_session: default_max_connections_per_session(),
            read_frame_cap_bytes: default_read_frame_cap_bytes(),
            pty_read_chunk_bytes: default_pty_read_chunk_bytes(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
            window_watch_interval_secs: default_window_watch_interval_secs(),
            child_term_grace_secs: default_child_term_grace_secs(),
        }
    }
}

impl Default for TmuxConfig {
    fn default() -> Self {
        Self {
            binary: default_tmux_binary(),
            session_marker: default_session_marker(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file (panics on failure). Otherwise
    /// looks for `palmux.toml` in the current directory, falling back to
    /// compiled defaults.
    pub fn load(path: Option<&str>) -> Self {
        let mut config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("Failed to read config file {p}: {e}"));
            toml::from_str(&content)
                .unwrap_or_else(|e| panic!("Failed to parse config file {p}: {e}"))
        } else if Path::new("palmux.toml").exists() {
            let content = std::fs::read_to_string("palmux.toml").expect("Failed to read palmux.toml");
            toml::from_str(&content).expect("Failed to parse palmux.toml")
        } else {
            Config {
                server: ServerConfig::default(),
                tmux: TmuxConfig::default(),
                auth: AuthConfig::default(),
                logging: LoggingConfig::default(),
            }
        };

        if let Ok(key) = std::env::var("PALMUX_API_KEY") {
            config.auth.api_key = key;
        }
        if let Ok(listen) = std::env::var("PALMUX_LISTEN") {
            config.server.listen = listen;
        }

        config
    }

    /// Validate the loaded configuration. Called once at startup, before
    /// binding the listener; errors are logged and the process exits
    /// non-zero.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.max_connections_per_session == 0 {
            return Err("server.max_connections_per_session must be > 0".to_string());
        }
        if self.server.read_frame_cap_bytes < self.server.pty_read_chunk_bytes {
            return Err(
                "server.read_frame_cap_bytes must be >= server.pty_read_chunk_bytes".to_string(),
            );
        }
        if self.tmux.session_marker.is_empty() {
            return Err("tmux.session_marker must not be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Config {
        Config {
            server: ServerConfig::default(),
            tmux: TmuxConfig::default(),
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn default_config_validates() {
        assert!(defaults().validate().is_ok());
    }

    #[test]
    fn rejects_zero_connection_cap() {
        let mut config = defaults();
        config.server.max_connections_per_session = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_read_cap_smaller_than_chunk_size() {
        let mut config = defaults();
        config.server.read_frame_cap_bytes = 100;
        config.server.pty_read_chunk_bytes = 4096;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_session_marker() {
        let mut config = defaults();
        config.tmux.session_marker = String::new();
        assert!(config.validate().is_err());
    }
}
