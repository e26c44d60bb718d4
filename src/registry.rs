//! Process-wide map of live attachments with a per-session admission cap.
//!
//! Grounded on the teacher's `SessionManager::create_session_inner`, which
//! holds its write lock across the whole check-and-insert to avoid a
//! TOCTOU race between the limit check and the insert. The same discipline
//! applies here to `admit`.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;
use uuid::Uuid;

/// One live browser attachment.
#[derive(Debug, Clone)]
pub struct Connection {
    pub session: String,
    pub remote_addr: IpAddr,
    pub connected_at: u64,
}

/// Admission-controlled registry of live [`Connection`]s, keyed by an opaque
/// connection id.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<HashMap<String, Connection>>>,
    max_per_session: usize,
}

impl ConnectionRegistry {
    pub fn new(max_per_session: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            max_per_session,
        }
    }

    /// Admit a connection for `session` if it is under the per-session cap.
    /// The count and the insert happen under a single lock acquisition, so
    /// concurrent admissions for the same session can't both slip past the
    /// cap (Invariant 3 / property P1).
    pub async fn admit(&self, session: &str, remote_addr: IpAddr) -> Option<String> {
        let mut connections = self.inner.lock().await;
        let current = connections.values().filter(|c| c.session == session).count();
        if current >= self.max_per_session {
            return None;
        }
        let id = Uuid::new_v4().to_string();
        connections.insert(
            id.clone(),
            Connection {
                session: session.to_string(),
                remote_addr,
                connected_at: now_epoch_secs(),
            },
        );
        Some(id)
    }

    /// Remove a connection. Idempotent — releasing an id twice is a no-op
    /// the second time.
    pub async fn release(&self, id: &str) {
        self.inner.lock().await.remove(id);
    }

    /// Snapshot of all current connections, for `GET /api/connections`.
    pub async fn snapshot(&self) -> Vec<Connection> {
        self.inner.lock().await.values().cloned().collect()
    }
}

fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[tokio::test]
    async fn admit_respects_the_per_session_cap() {
        let registry = ConnectionRegistry::new(2);
        let a = registry.admit("main", addr()).await;
        let b = registry.admit("main", addr()).await;
        let c = registry.admit("main", addr()).await;
        assert!(a.is_some());
        assert!(b.is_some());
        assert!(c.is_none(), "third admission should be rejected at the cap");
    }

    #[tokio::test]
    async fn cap_is_per_session_not_global() {
        let registry = ConnectionRegistry::new(1);
        let a = registry.admit("main", addr()).await;
        let b = registry.admit("other", addr()).await;
        assert!(a.is_some());
        assert!(b.is_some());
    }

    #[tokio::test]
    async fn release_frees_a_slot_for_new_admissions() {
        let registry = ConnectionRegistry::new(1);
        let a = registry.admit("main", addr()).await.unwrap();
        assert!(registry.admit("main", addr()).await.is_none());
        registry.release(&a).await;
        assert!(registry.admit("main", addr()).await.is_some());
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let registry = ConnectionRegistry::new(5);
        let id = registry.admit("main", addr()).await.unwrap();
        registry.release(&id).await;
        registry.release(&id).await;
        assert!(registry.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn snapshot_reflects_current_connections() {
        let registry = ConnectionRegistry::new(5);
        registry.admit("main", addr()).await;
        registry.admit("main", addr()).await;
        let snap = registry.snapshot().await;
        assert_eq!(snap.len(), 2);
        assert!(snap.iter().all(|c| c.session == "main"));
    }
}
