//! PTY allocation, attach-child spawning, and terminal resize.
//!
//! Uses the `nix` crate for POSIX PTY APIs. The PTY master fd is kept alive
//! for the bridge's lifetime so resize and the window-watcher's tty lookup
//! can be performed on it.

use std::collections::HashMap;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::process::Stdio;

use nix::pty::{openpty, OpenptyResult, Winsize};
use tokio::process::{Child, Command};

/// An allocated PTY pair (master + slave).
pub struct PtyPair {
    pub master: OwnedFd,
    pub slave: OwnedFd,
}

/// Allocate a PTY pair.
///
/// No initial window size is requested here (spec §4.B: "No initial window
/// size is set here; the first `resize` message from the client sets it.").
/// tmux/the kernel default to a small non-zero size until the client resizes.
pub fn allocate_pty() -> Result<PtyPair, nix::Error> {
    let OpenptyResult { master, slave } = openpty(None, None)?;
    Ok(PtyPair { master, slave })
}

/// Resolve the device path of a PTY master's slave end (e.g. `/dev/pts/4`).
///
/// Used once per bridge so the client-window-watcher can query which
/// session/window the multiplexer currently shows on this slave (§4.D
/// goroutine 4). Returns `None` on platforms/fds where the lookup is
/// unavailable — callers disable the watcher rather than failing the bridge.
pub fn slave_path(master: &OwnedFd) -> Option<String> {
    // SAFETY: ptsname_r is a plain syscall wrapper; master is a valid, open fd.
    unsafe { nix::pty::ptsname_r(master) }.ok()
}

/// Spawn the multiplexer's attach subcommand on the slave side of the PTY.
///
/// The child becomes its own session leader with the PTY slave as its
/// controlling terminal, so it behaves exactly like a real terminal emulator
/// driving `tmux attach`.
pub fn spawn_attach(
    pty: &PtyPair,
    binary: &str,
    argv: &[&str],
    env_overrides: Option<&HashMap<String, String>>,
) -> std::io::Result<Child> {
    let slave_fd = pty.slave.as_raw_fd();
    let mut cmd = Command::new(binary);
    cmd.args(argv).kill_on_drop(true);

    // The child's stdio is handled by pre_exec (dup2 to PTY slave), so tell
    // tokio not to set up pipes.
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    // §4.B.2: inherit current environment, then override TERM unconditionally
    // (enables OSC-52 clipboard pass-through in the multiplexer).
    cmd.env("TERM", "xterm-256color");
    if let Some(vars) = env_overrides {
        cmd.envs(vars);
    }

    // SAFETY: All syscalls used here are async-signal-safe per POSIX.
    unsafe {
        cmd.pre_exec(move || {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            if libc::ioctl(slave_fd, libc::TIOCSCTTY, 0) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            libc::dup2(slave_fd, 0);
            libc::dup2(slave_fd, 1);
            libc::dup2(slave_fd, 2);
            if slave_fd > 2 {
                libc::close(slave_fd);
            }
            Ok(())
        });
    }

    cmd.spawn()
}

/// Duplicate a PTY master fd into an independent, owned async file handle.
///
/// The bridge needs two such handles (one read side, one write side) so the
/// PTY-reader and socket-reader loops can each own their half without
/// fighting over a single `&mut`. Mirrors the dup-then-wrap pattern the
/// teacher used for its own PTY-backed sessions.
pub fn dup_async(fd: &OwnedFd) -> std::io::Result<tokio::fs::File> {
    let dup = unsafe { libc::dup(fd.as_raw_fd()) };
    if dup < 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: dup() just returned a fresh, uniquely owned fd.
    Ok(tokio::fs::File::from_std(unsafe {
        std::fs::File::from_raw_fd(dup)
    }))
}

/// Resize a PTY's terminal window (`TIOCSWINSZ` on the master).
pub fn resize_pty(master: &OwnedFd, rows: u16, cols: u16) -> Result<(), nix::Error> {
    let winsize = Winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: TIOCSWINSZ is a well-defined ioctl that writes a Winsize struct.
    let ret = unsafe {
        libc::ioctl(
            master.as_raw_fd(),
            libc::TIOCSWINSZ,
            std::ptr::addr_of!(winsize),
        )
    };
    if ret == -1 {
        Err(nix::Error::last())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_pty_yields_a_resolvable_slave_path() {
        let pair = allocate_pty().expect("openpty should succeed in test sandbox");
        let path = slave_path(&pair.master);
        assert!(path.is_some());
        assert!(path.unwrap().starts_with("/dev/"));
    }
}
