//! Session and window bookkeeping on top of the multiplexer, plus the
//! machinery to spawn a PTY-attached child and manufacture per-viewer
//! "grouped sessions".
//!
//! [`SessionManager`] is the single authority the rest of the engine talks
//! to for anything involving the multiplexer's session namespace. It wraps
//! an [`Executor`] for query/mutation subcommands (`list-sessions`,
//! `new-session`, `kill-session`, ...) and uses [`crate::shell::pty`]
//! directly for the one operation that must not have its output captured:
//! spawning the attach child under a PTY.

pub mod session;

use std::fmt;
use std::os::fd::OwnedFd;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Child;
use tracing::{info, warn};
use uuid::Uuid;

use crate::executor::{Executor, ExecutorError};
use crate::shell::pty::{self, PtyPair};

/// Name of a session as returned by `list-sessions`, with the fields the
/// engine needs to show a listing or drive the startup cleanup sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub name: String,
    pub windows: u32,
    pub attached: bool,
    pub created_at: u64,
    pub last_activity: u64,
}

/// A freshly spawned attach child, owned exclusively by one bridge for its
/// lifetime (spec: "AttachHandle").
pub struct AttachHandle {
    pub pty_master: OwnedFd,
    pub child: Child,
    /// Non-empty iff the engine created a grouped session for this
    /// attachment; used solely to destroy it at teardown.
    pub group_session_name: Option<String>,
    /// Device path of the PTY slave, used by the window-watcher. `None` if
    /// the platform/fd did not yield one — the watcher disables itself.
    pub tty_path: Option<String>,
}

#[derive(Debug)]
pub enum SessionManagerError {
    SessionNotFound,
    /// The PTY could not be opened or the attach binary could not be spawned.
    SpawnFailed(String),
    /// `get_client_window` found no client attached at the given tty path.
    ClientNotFound,
    Other(String),
}

impl fmt::Display for SessionManagerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionNotFound => write!(f, "session not found"),
            Self::SpawnFailed(e) => write!(f, "failed to spawn attach child: {e}"),
            Self::ClientNotFound => write!(f, "no client attached at that tty"),
            Self::Other(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SessionManagerError {}

impl From<ExecutorError> for SessionManagerError {
    fn from(e: ExecutorError) -> Self {
        match e {
            ExecutorError::SessionNotFound => Self::SessionNotFound,
            ExecutorError::NoServerRunning => Self::SessionNotFound,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Format string fed to `list-sessions -F`. Tab-separated, matching §4.B.
const LIST_SESSIONS_FORMAT: &str =
    "#{session_name}\t#{session_windows}\t#{session_attached}\t#{session_created}\t#{session_activity}";

/// Format string fed to `list-clients -F`, used by [`SessionManager::get_client_window`].
const LIST_CLIENTS_FORMAT: &str = "#{client_tty}\t#{session_name}\t#{window_index}\t#{session_group}";

pub struct SessionManager {
    executor: Arc<dyn Executor>,
    /// Path/name of the multiplexer binary, used only for the PTY-attached
    /// spawn — every other operation goes through `executor`.
    binary: String,
    /// Grouped-session name prefix (e.g. `_palmux_`).
    marker: String,
}

impl SessionManager {
    pub fn new(executor: Arc<dyn Executor>, binary: impl Into<String>, marker: impl Into<String>) -> Self {
        Self {
            executor,
            binary: binary.into(),
            marker: marker.into(),
        }
    }

    /// List user sessions, dropping every grouped session (Invariant 5).
    /// `NoServerRunning` is not an error here — it means an empty list.
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, SessionManagerError> {
        let all = self.list_sessions_raw().await?;
        Ok(all
            .into_iter()
            .filter(|s| !s.name.starts_with(&self.marker))
            .collect())
    }

    async fn list_sessions_raw(&self) -> Result<Vec<SessionSummary>, SessionManagerError> {
        let out = match self
            .executor
            .run(&["list-sessions", "-F", LIST_SESSIONS_FORMAT])
            .await
        {
            Ok(out) => out,
            Err(ExecutorError::NoServerRunning) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(parse_session_lines(&out))
    }

    /// Destroy every grouped session left behind by a prior crash. Called
    /// once at startup before binding the listener.
    pub async fn cleanup_grouped_sessions(&self) -> usize {
        let all = match self.list_sessions_raw().await {
            Ok(all) => all,
            Err(e) => {
                warn!("startup cleanup: failed to list sessions: {e}");
                return 0;
            }
        };
        let mut count = 0;
        for s in all.into_iter().filter(|s| s.name.starts_with(&self.marker)) {
            self.destroy_grouped_session(&s.name).await;
            count += 1;
        }
        count
    }

    /// Create a fresh grouped session linked to `target`. Fails if `target`
    /// doesn't exist.
    pub async fn create_grouped_session(&self, target: &str) -> Result<String, SessionManagerError> {
        // 16 hex chars from a v4 UUID: 128 bits of OS-backed randomness,
        // comfortably over the spec's >= 8 bytes.
        let suffix = Uuid::new_v4().simple().to_string();
        let grouped_name = format!("{}{}", self.marker, &suffix[..16]);

        self.executor
            .run(&["new-session", "-d", "-t", target, "-s", &grouped_name])
            .await?;

        // Cosmetic: hide the status bar on the grouped session. Best-effort —
        // a failure here must not fail admission.
        if let Err(e) = self
            .executor
            .run(&["set-option", "-t", &grouped_name, "status", "off"])
            .await
        {
            warn!("grouped session {grouped_name}: failed to disable status bar: {e}");
        }

        info!("created grouped session {grouped_name} for target {target}");
        Ok(grouped_name)
    }

    /// Destroy a grouped session. Idempotent: absence is tolerated.
    pub async fn destroy_grouped_session(&self, name: &str) {
        match self.executor.run(&["kill-session", "-t", name]).await {
            Ok(_) => info!("destroyed grouped session {name}"),
            Err(ExecutorError::SessionNotFound | ExecutorError::NoServerRunning) => {}
            Err(e) => warn!("failed to destroy grouped session {name}: {e}"),
        }
    }

    /// Spawn the multiplexer's attach subcommand under a fresh PTY.
    ///
    /// `target` is whatever name should actually be attached to (a grouped
    /// name or a raw user session name); `group_session_name` is stashed
    /// into the returned handle purely so the bridge can destroy it at
    /// teardown — it plays no role in the attach itself.
    pub async fn attach(
        &self,
        target: &str,
        window_index: i32,
        group_session_name: Option<String>,
    ) -> Result<AttachHandle, SessionManagerError> {
        // Fail fast, before opening any OS resources, if the target is gone.
        self.executor.run(&["has-session", "-t", target]).await?;

        let pair: PtyPair = pty::allocate_pty().map_err(|e| SessionManagerError::SpawnFailed(e.to_string()))?;
        let tty_path = pty::slave_path(&pair.master);

        let target_window = format!("{target}:{window_index}");
        let mut argv: Vec<&str> = vec!["attach-session", "-t", target];
        if window_index >= 0 {
            // No shell is involved here — argv goes straight to execve — so the
            // separator is the literal single-character string `;`, not `\;`.
            argv.extend([";", "select-window", "-t", target_window.as_str()]);
        }

        let child = pty::spawn_attach(&pair, &self.binary, &argv, None)
            .map_err(|e| SessionManagerError::SpawnFailed(e.to_string()))?;

        Ok(AttachHandle {
            pty_master: pair.master,
            child,
            group_session_name,
            tty_path,
        })
    }

    /// Resolve which `(session, window)` the multiplexer currently shows on
    /// `tty_path`, de-mangling a grouped session back to its user-visible
    /// group name.
    pub async fn get_client_window(&self, tty_path: &str) -> Result<(String, i32), SessionManagerError> {
        let out = self
            .executor
            .run(&["list-clients", "-F", LIST_CLIENTS_FORMAT])
            .await?;
        for line in String::from_utf8_lossy(&out).lines() {
            let mut fields = line.split('\t');
            let (Some(tty), Some(session), Some(window), Some(group)) =
                (fields.next(), fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            if tty != tty_path {
                continue;
            }
            let window_index: i32 = window.parse().unwrap_or(0);
            let reported = if session.starts_with(&self.marker) && !group.is_empty() {
                group.to_string()
            } else {
                session.to_string()
            };
            return Ok((reported, window_index));
        }
        Err(SessionManagerError::ClientNotFound)
    }
}

fn parse_session_lines(raw: &[u8]) -> Vec<SessionSummary> {
    String::from_utf8_lossy(raw)
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let name = fields.next()?.to_string();
            let windows = fields.next()?.parse().ok()?;
            let attached = fields.next()? == "1";
            let created_at = fields.next()?.parse().ok()?;
            let last_activity = fields.next()?.parse().ok()?;
            Some(SessionSummary {
                name,
                windows,
                attached,
                created_at,
                last_activity,
            })
        })
        .collect()
}

/// Grace period allotted to the attach child between SIGTERM and SIGKILL.
pub const CHILD_TERM_GRACE: Duration = Duration::from_secs(3);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{FakeExecutor, ScriptedCall};

    fn fake(calls: Vec<ScriptedCall>) -> SessionManager {
        SessionManager::new(Arc::new(FakeExecutor::new(calls)), "tmux", "_palmux_")
    }

    #[test]
    fn parse_session_lines_handles_well_formed_rows() {
        let raw = b"main\t2\t1\t1000\t2000\n_palmux_abc\t1\t0\t1500\t1500\n";
        let rows = parse_session_lines(raw);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "main");
        assert_eq!(rows[0].windows, 2);
        assert!(rows[0].attached);
        assert_eq!(rows[1].name, "_palmux_abc");
    }

    #[tokio::test]
    async fn list_sessions_filters_grouped_sessions() {
        let mgr = fake(vec![ScriptedCall {
            argv_prefix: vec!["list-sessions".to_string()],
            result: Ok(b"main\t1\t1\t10\t20\n_palmux_xyz\t1\t0\t10\t20\n".to_vec()),
        }]);
        let sessions = mgr.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].name, "main");
    }

    #[tokio::test]
    async fn list_sessions_treats_no_server_running_as_empty() {
        let mgr = fake(vec![ScriptedCall {
            argv_prefix: vec!["list-sessions".to_string()],
            result: Err(ExecutorError::NoServerRunning),
        }]);
        let sessions = mgr.list_sessions().await.unwrap();
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn cleanup_grouped_sessions_destroys_only_marker_prefixed_names() {
        let mgr = fake(vec![
            ScriptedCall {
                argv_prefix: vec!["list-sessions".to_string()],
                result: Ok(b"main\t1\t1\t10\t20\n_palmux_a\t1\t0\t10\t20\n_palmux_b\t1\t0\t10\t20\n".to_vec()),
            },
            ScriptedCall {
                argv_prefix: vec!["kill-session".to_string(), "-t".to_string(), "_palmux_a".to_string()],
                result: Ok(Vec::new()),
            },
            ScriptedCall {
                argv_prefix: vec!["kill-session".to_string(), "-t".to_string(), "_palmux_b".to_string()],
                result: Ok(Vec::new()),
            },
        ]);
        let n = mgr.cleanup_grouped_sessions().await;
        assert_eq!(n, 2);
    }

    #[tokio::test]
    async fn destroy_grouped_session_tolerates_missing_session() {
        let mgr = fake(vec![ScriptedCall {
            argv_prefix: vec!["kill-session".to_string()],
            result: Err(ExecutorError::SessionNotFound),
        }]);
        // Must not panic even though the session is already gone.
        mgr.destroy_grouped_session("_palmux_gone").await;
    }

    #[tokio::test]
    async fn get_client_window_demangles_grouped_session_to_group_name() {
        let mgr = fake(vec![ScriptedCall {
            argv_prefix: vec!["list-clients".to_string()],
            result: Ok(b"/dev/pts/4\t_palmux_abc\t2\tmain\n".to_vec()),
        }]);
        let (name, window) = mgr.get_client_window("/dev/pts/4").await.unwrap();
        assert_eq!(name, "main");
        assert_eq!(window, 2);
    }

    #[tokio::test]
    async fn get_client_window_errors_when_tty_not_found() {
        let mgr = fake(vec![ScriptedCall {
            argv_prefix: vec!["list-clients".to_string()],
            result: Ok(b"/dev/pts/9\tmain\t0\t\n".to_vec()),
        }]);
        let err = mgr.get_client_window("/dev/pts/4").await.unwrap_err();
        assert!(matches!(err, SessionManagerError::ClientNotFound));
    }

    #[tokio::test]
    async fn create_grouped_session_fails_when_target_missing() {
        let mgr = fake(vec![ScriptedCall {
            argv_prefix: vec!["new-session".to_string()],
            result: Err(ExecutorError::SessionNotFound),
        }]);
        let err = mgr.create_grouped_session("ghost").await.unwrap_err();
        assert!(matches!(err, SessionManagerError::SessionNotFound));
    }

    #[tokio::test]
    async fn attach_fails_fast_on_missing_session_without_opening_a_pty() {
        let mgr = fake(vec![ScriptedCall {
            argv_prefix: vec!["has-session".to_string()],
            result: Err(ExecutorError::SessionNotFound),
        }]);
        let err = mgr.attach("ghost", -1, None).await.unwrap_err();
        assert!(matches!(err, SessionManagerError::SessionNotFound));
    }
}
