//! Runs multiplexer subcommands and classifies well-known failures.
//!
//! [`Executor`] is the only way the rest of the engine talks to the
//! multiplexer binary. It is a trait so tests can substitute a
//! [`FakeExecutor`] that returns scripted output instead of shelling out to a
//! real `tmux`.

use std::collections::VecDeque;
use std::fmt;
use std::process::Stdio;
use std::sync::Mutex;

use tokio::process::Command;

/// Substring tmux prints to stderr when no server is running at all.
const NO_SERVER_MARKER: &str = "no server running";
/// Substring tmux prints to stderr when the named session doesn't exist.
const NO_SESSION_MARKER: &str = "can't find session";

/// Typed failures the engine needs to branch on. Everything else collapses
/// into `Failed`.
#[derive(Debug)]
pub enum ExecutorError {
    /// No multiplexer server process is running at all.
    NoServerRunning,
    /// The server is running but the named session doesn't exist.
    SessionNotFound,
    /// Any other non-zero exit. Carries the argv and the combined
    /// stdout+stderr for diagnostics.
    Failed { argv: Vec<String>, output: Vec<u8> },
    /// The multiplexer binary could not be spawned at all (not found,
    /// permission denied, ...).
    SpawnFailed(String),
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorError::NoServerRunning => write!(f, "no server running"),
            ExecutorError::SessionNotFound => write!(f, "can't find session"),
            ExecutorError::Failed { argv, output } => write!(
                f,
                "command {:?} failed: {}",
                argv,
                String::from_utf8_lossy(output)
            ),
            ExecutorError::SpawnFailed(e) => write!(f, "failed to spawn multiplexer: {e}"),
        }
    }
}

impl std::error::Error for ExecutorError {}

/// Executes subcommands of the multiplexer binary.
///
/// `run` is the only method the core engine calls. `run_with_stdin` exists
/// for collaborators outside the core (§9 "run-with-stdin variant used only
/// by collaborators outside the core") — e.g. feeding a command file to
/// `tmux source-file -`. The engine itself never needs it.
#[async_trait::async_trait]
pub trait Executor: Send + Sync {
    /// Run `argv` and return raw stdout bytes on success.
    async fn run(&self, argv: &[&str]) -> Result<Vec<u8>, ExecutorError>;

    /// Run `argv`, writing `stdin` to the child before waiting for exit.
    async fn run_with_stdin(&self, argv: &[&str], stdin: &[u8]) -> Result<Vec<u8>, ExecutorError>;
}

/// Executor backed by a real multiplexer binary on `PATH` (or an absolute
/// path supplied via config).
pub struct TmuxExecutor {
    binary: String,
}

impl TmuxExecutor {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn classify(argv: &[&str], status_success: bool, stdout: Vec<u8>, stderr: &[u8]) -> Result<Vec<u8>, ExecutorError> {
        if status_success {
            return Ok(stdout);
        }
        let stderr_lossy = String::from_utf8_lossy(stderr);
        if stderr_lossy.contains(NO_SERVER_MARKER) {
            return Err(ExecutorError::NoServerRunning);
        }
        if stderr_lossy.contains(NO_SESSION_MARKER) {
            return Err(ExecutorError::SessionNotFound);
        }
        let mut combined = stdout;
        combined.extend_from_slice(stderr);
        Err(ExecutorError::Failed {
            argv: argv.iter().map(ToString::to_string).collect(),
            output: combined,
        })
    }
}

#[async_trait::async_trait]
impl Executor for TmuxExecutor {
    async fn run(&self, argv: &[&str]) -> Result<Vec<u8>, ExecutorError> {
        let output = Command::new(&self.binary)
            .args(argv)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ExecutorError::SpawnFailed(e.to_string()))?;
        Self::classify(argv, output.status.success(), output.stdout, &output.stderr)
    }

    async fn run_with_stdin(&self, argv: &[&str], stdin: &[u8]) -> Result<Vec<u8>, ExecutorError> {
        use tokio::io::AsyncWriteExt;

        let mut child = Command::new(&self.binary)
            .args(argv)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExecutorError::SpawnFailed(e.to_string()))?;

        if let Some(mut pipe) = child.stdin.take() {
            let _ = pipe.write_all(stdin).await;
        }
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ExecutorError::SpawnFailed(e.to_string()))?;
        Self::classify(argv, output.status.success(), output.stdout, &output.stderr)
    }
}

/// A single scripted response for [`FakeExecutor`]: matched against the argv
/// prefix so tests don't need to spell out e.g. a random grouped-session
/// suffix.
pub struct ScriptedCall {
    pub argv_prefix: Vec<String>,
    pub result: Result<Vec<u8>, ExecutorError>,
}

/// Test double that returns pre-recorded stdout or synthesized typed errors
/// instead of invoking a real binary. Calls are matched in FIFO order against
/// scripted expectations whose argv prefix matches; unmatched calls panic so
/// tests fail loudly instead of silently no-op'ing.
pub struct FakeExecutor {
    calls: Mutex<VecDeque<ScriptedCall>>,
}

impl FakeExecutor {
    pub fn new(calls: Vec<ScriptedCall>) -> Self {
        Self {
            calls: Mutex::new(calls.into()),
        }
    }

    fn take_matching(&self, argv: &[&str]) -> Result<Vec<u8>, ExecutorError> {
        let mut calls = self.calls.lock().unwrap();
        let pos = calls.iter().position(|c| {
            argv.len() >= c.argv_prefix.len()
                && argv
                    .iter()
                    .zip(c.argv_prefix.iter())
                    .all(|(a, b)| *a == b)
        });
        match pos {
            Some(i) => calls.remove(i).unwrap().result,
            None => panic!("FakeExecutor: no scripted call matches argv {argv:?}"),
        }
    }
}

#[async_trait::async_trait]
impl Executor for FakeExecutor {
    async fn run(&self, argv: &[&str]) -> Result<Vec<u8>, ExecutorError> {
        self.take_matching(argv)
    }

    async fn run_with_stdin(&self, argv: &[&str], _stdin: &[u8]) -> Result<Vec<u8>, ExecutorError> {
        self.take_matching(argv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_executor_matches_by_argv_prefix() {
        let exec = FakeExecutor::new(vec![ScriptedCall {
            argv_prefix: vec!["list-sessions".to_string()],
            result: Ok(b"main\t1\t0\t100\t200\n".to_vec()),
        }]);
        let out = exec.run(&["list-sessions", "-F", "x"]).await.unwrap();
        assert_eq!(out, b"main\t1\t0\t100\t200\n");
    }

    #[tokio::test]
    async fn fake_executor_returns_typed_errors() {
        let exec = FakeExecutor::new(vec![ScriptedCall {
            argv_prefix: vec!["attach-session".to_string()],
            result: Err(ExecutorError::SessionNotFound),
        }]);
        let err = exec.run(&["attach-session", "-t", "ghost"]).await.unwrap_err();
        assert!(matches!(err, ExecutorError::SessionNotFound));
    }

    #[test]
    fn classify_detects_no_server_running() {
        let err = TmuxExecutor::classify(
            &["list-sessions"],
            false,
            Vec::new(),
            b"no server running on /tmp/tmux-0/default",
        )
        .unwrap_err();
        assert!(matches!(err, ExecutorError::NoServerRunning));
    }

    #[test]
    fn classify_detects_session_not_found() {
        let err = TmuxExecutor::classify(
            &["attach-session", "-t", "ghost"],
            false,
            Vec::new(),
            b"can't find session: ghost",
        )
        .unwrap_err();
        assert!(matches!(err, ExecutorError::SessionNotFound));
    }

    #[test]
    fn classify_falls_back_to_opaque_failure() {
        let err = TmuxExecutor::classify(&["frobnicate"], false, b"partial".to_vec(), b"nope")
            .unwrap_err();
        match err {
            ExecutorError::Failed { argv, output } => {
                assert_eq!(argv, vec!["frobnicate".to_string()]);
                assert_eq!(output, b"partialnope");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }
}
