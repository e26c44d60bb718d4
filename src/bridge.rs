//! Per-connection unit that owns one PTY, one child process, and one
//! WebSocket, and the four concurrent loops wiring them together.
//!
//! Grounded on the teacher's `ws::handle_ws`: split sink/stream, a
//! serializing mpsc-fed writer task, and `tokio::select!` fan-in over
//! concurrent sources. Generalized from session-buffer fan-out to direct
//! PTY-to-socket bridging, with a [`CancellationToken`] coordinating the
//! four loops per §9's "break the cycle" design note.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::registry::ConnectionRegistry;
use crate::sessions::session::graceful_kill;
use crate::sessions::{AttachHandle, SessionManager};
use crate::shell::pty;

/// Tunables that gate the four loops. Mirrors `SPEC_FULL.md` §A.3's
/// `[server]` config section.
#[derive(Clone, Copy)]
pub struct BridgeConfig {
    pub read_frame_cap_bytes: usize,
    pub pty_read_chunk_bytes: usize,
    pub keepalive_interval: Duration,
    pub window_watch_interval: Duration,
    pub child_term_grace: Duration,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Input { data: String },
    Resize { cols: u16, rows: u16 },
    Pong,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    Output { data: String },
    Ping,
    ClientStatus { session: String, window: i32 },
}

/// Runs a bridge to completion: wires the PTY, child, and socket together,
/// blocks until any of the four loops ends the connection, then tears
/// everything down in the order §4.D/§7 mandates. Always returns — there is
/// no panicking path out of a bridge.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    handle: AttachHandle,
    socket: WebSocket,
    conn_id: String,
    session: String,
    registry: ConnectionRegistry,
    session_manager: Arc<SessionManager>,
    config: BridgeConfig,
    shutdown: CancellationToken,
) {
    let AttachHandle {
        pty_master,
        mut child,
        group_session_name,
        tty_path,
    } = handle;

    let pty_read = match pty::dup_async(&pty_master) {
        Ok(f) => f,
        Err(e) => {
            warn!("bridge {conn_id}: failed to dup PTY master for reading: {e}");
            teardown(&registry, &conn_id, &mut child, &config).await;
            drop(pty_master);
            if let Some(name) = &group_session_name {
                session_manager.destroy_grouped_session(name).await;
            }
            return;
        }
    };
    let pty_write = match pty::dup_async(&pty_master) {
        Ok(f) => f,
        Err(e) => {
            warn!("bridge {conn_id}: failed to dup PTY master for writing: {e}");
            teardown(&registry, &conn_id, &mut child, &config).await;
            drop(pty_master);
            if let Some(name) = &group_session_name {
                session_manager.destroy_grouped_session(name).await;
            }
            return;
        }
    };

    let (ws_sink, ws_stream) = socket.split();
    let cancel = CancellationToken::new();
    let (write_tx, write_rx) = mpsc::channel::<ServerMessage>(64);

    let writer_handle = tokio::spawn(writer_task(write_rx, ws_sink));

    let pty_reader_handle = tokio::spawn(pty_reader_task(
        cancel.clone(),
        pty_read,
        write_tx.clone(),
        config.pty_read_chunk_bytes,
    ));
    let socket_reader_handle = tokio::spawn(socket_reader_task(
        cancel.clone(),
        ws_stream,
        pty_write,
        pty_master_clone_for_resize(&pty_master),
        write_tx.clone(),
        config.read_frame_cap_bytes,
    ));
    let keepalive_handle = tokio::spawn(keepalive_task(
        cancel.clone(),
        write_tx.clone(),
        config.keepalive_interval,
    ));
    let watcher_handle = tokio::spawn(window_watcher_task(
        cancel.clone(),
        write_tx.clone(),
        Arc::clone(&session_manager),
        tty_path,
        config.window_watch_interval,
    ));

    info!("bridge {conn_id}: attached to session {session}");

    tokio::select! {
        _ = pty_reader_handle => {}
        _ = socket_reader_handle => {}
        _ = keepalive_handle => {}
        _ = watcher_handle => {}
        () = shutdown.cancelled() => {}
    }

    // Every loop observes this from here on; whichever haven't already
    // returned unwind on their next select iteration.
    cancel.cancel();

    // Steps 2-4: deregister, then SIGTERM the child and wait (escalating to
    // SIGKILL after the grace period).
    teardown(&registry, &conn_id, &mut child, &config).await;

    // Step 5: close the PTY master.
    drop(pty_master);

    // Step 6: destroy any grouped session created for this bridge.
    if let Some(name) = &group_session_name {
        session_manager.destroy_grouped_session(name).await;
    }

    // Step 7: close the WebSocket last.
    drop(write_tx);
    let _ = writer_handle.await;

    info!("bridge {conn_id}: torn down");
}

/// The PTY master fd is needed both for the write-side dup and for resize
/// ioctls issued by the socket-reader loop. `nix`'s ioctl wrapper only needs
/// a borrow, so hand the socket-reader a second dup rather than sharing a
/// reference across tasks.
fn pty_master_clone_for_resize(master: &std::os::fd::OwnedFd) -> std::os::fd::OwnedFd {
    use std::os::fd::{AsRawFd, FromRawFd};
    // SAFETY: dup() returns a fresh fd owning a new reference to the same
    // underlying PTY master.
    unsafe { std::os::fd::OwnedFd::from_raw_fd(libc::dup(master.as_raw_fd())) }
}

async fn writer_task(
    mut rx: mpsc::Receiver<ServerMessage>,
    mut sink: futures::stream::SplitSink<WebSocket, WsMessage>,
) {
    while let Some(msg) = rx.recv().await {
        let Ok(text) = serde_json::to_string(&msg) else {
            continue;
        };
        if sink.send(WsMessage::Text(text.into())).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn pty_reader_task(
    cancel: CancellationToken,
    mut pty_read: tokio::fs::File,
    write_tx: mpsc::Sender<ServerMessage>,
    chunk_bytes: usize,
) {
    let mut buf = vec![0u8; chunk_bytes];
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            res = pty_read.read(&mut buf) => {
                match res {
                    Ok(0) | Err(_) => {
                        // EOF (child exited) or read error — end the bridge.
                        return;
                    }
                    Ok(n) => {
                        let data = String::from_utf8_lossy(&buf[..n]).into_owned();
                        if write_tx.send(ServerMessage::Output { data }).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

async fn socket_reader_task(
    cancel: CancellationToken,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    mut pty_write: tokio::fs::File,
    pty_master: std::os::fd::OwnedFd,
    write_tx: mpsc::Sender<ServerMessage>,
    read_frame_cap_bytes: usize,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            msg = ws_stream.next() => {
                let Some(Ok(msg)) = msg else { return };
                let text = match msg {
                    WsMessage::Text(text) => text,
                    WsMessage::Close(_) => return,
                    _ => continue,
                };
                if text.len() > read_frame_cap_bytes {
                    warn!("socket-reader: frame of {} bytes exceeds {} byte cap, aborting", text.len(), read_frame_cap_bytes);
                    return;
                }
                let parsed: ClientMessage = match serde_json::from_str(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("socket-reader: malformed client message, skipping: {e}");
                        continue;
                    }
                };
                match parsed {
                    ClientMessage::Input { data } => {
                        if pty_write.write_all(data.as_bytes()).await.is_err() {
                            return;
                        }
                        if pty_write.flush().await.is_err() {
                            return;
                        }
                    }
                    ClientMessage::Resize { cols, rows } => {
                        if cols == 0 || rows == 0 {
                            continue;
                        }
                        if let Err(e) = pty::resize_pty(&pty_master, rows, cols) {
                            warn!("socket-reader: resize failed: {e}");
                        }
                    }
                    ClientMessage::Pong => {}
                }
            }
        }
    }
}

async fn keepalive_task(
    cancel: CancellationToken,
    write_tx: mpsc::Sender<ServerMessage>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately; consume it
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {
                if write_tx.send(ServerMessage::Ping).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn window_watcher_task(
    cancel: CancellationToken,
    write_tx: mpsc::Sender<ServerMessage>,
    session_manager: Arc<SessionManager>,
    tty_path: Option<String>,
    interval: Duration,
) {
    let Some(tty_path) = tty_path else {
        // Platform/fd gave us no slave path — feature unavailable.
        return;
    };
    let mut ticker = tokio::time::interval(interval);
    let mut baseline: Option<(String, i32)> = None;
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {
                match session_manager.get_client_window(&tty_path).await {
                    Ok(current) => {
                        match &baseline {
                            None => baseline = Some(current),
                            Some(prev) if *prev != current => {
                                let (session, window) = current.clone();
                                baseline = Some(current);
                                if write_tx
                                    .send(ServerMessage::ClientStatus { session, window })
                                    .await
                                    .is_err()
                                {
                                    return;
                                }
                            }
                            Some(_) => {}
                        }
                    }
                    Err(e) => {
                        // Skip this tick; a query error is not fatal to the bridge.
                        warn!("window-watcher: get_client_window failed: {e}");
                    }
                }
            }
        }
    }
}

/// Steps 2-4 of the idempotent teardown procedure (spec §4.D/§7): deregister
/// from the registry, then SIGTERM the child and wait up to the configured
/// grace period, escalating to SIGKILL. Steps 5-7 (close the PTY master,
/// destroy any grouped session, close the WebSocket) happen in the caller,
/// in that order, since they need ownership of resources this function only
/// borrows.
async fn teardown(
    registry: &ConnectionRegistry,
    conn_id: &str,
    child: &mut tokio::process::Child,
    config: &BridgeConfig,
) {
    registry.release(conn_id).await;
    graceful_kill(child, config.child_term_grace).await;
}
