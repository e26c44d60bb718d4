//! Process-group signalling shared by bridge teardown.

use std::time::Duration;

use tokio::process::Child;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

/// SIGTERM the child, wait up to `grace` for exit, then SIGKILL if still running.
///
/// Grounded on the teacher's `ManagedSession::graceful_kill` (SIGTERM → poll
/// up to 3s → SIGKILL), generalized to operate on a bare `tokio::process::Child`
/// rather than a process group: an attach child is its own session leader
/// (`setsid` in `pre_exec`) and has no children of its own to reach with a
/// group signal.
pub async fn graceful_kill(child: &mut Child, grace: Duration) {
    let Some(pid) = child.id() else {
        // Already reaped.
        return;
    };
    #[allow(clippy::cast_possible_wrap)]
    let pid = pid as i32;

    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }

    let deadline = Instant::now() + grace;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                info!("attach child {pid} exited: {status}");
                return;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("attach child {pid}: try_wait error: {e}");
                return;
            }
        }
        if Instant::now() >= deadline {
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }

    warn!("attach child {pid}: still running after {grace:?}, sending SIGKILL");
    unsafe {
        libc::kill(pid, libc::SIGKILL);
    }
    if let Err(e) = child.wait().await {
        warn!("attach child {pid}: wait after SIGKILL failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::process::Command;

    #[tokio::test]
    async fn graceful_kill_reaps_a_cooperative_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        graceful_kill(&mut child, Duration::from_secs(3)).await;
        assert!(child.try_wait().unwrap().is_some());
    }

    #[tokio::test]
    async fn graceful_kill_escalates_to_sigkill_for_a_stubborn_child() {
        // `sh -c 'trap "" TERM; sleep 30'` ignores SIGTERM, forcing escalation.
        let mut child = Command::new("sh")
            .args(["-c", "trap '' TERM; sleep 30"])
            .spawn()
            .unwrap();
        graceful_kill(&mut child, Duration::from_millis(200)).await;
        assert!(child.try_wait().unwrap().is_some());
    }
}
