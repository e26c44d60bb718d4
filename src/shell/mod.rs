//! PTY allocation and child-process plumbing for attach sessions.

pub mod pty;
