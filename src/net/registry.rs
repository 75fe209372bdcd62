//! Session Registry
//!
//! Two concurrent collections: raw pre-handshake stream connections and
//! fully bound sessions, plus an index from datagram endpoint to session
//! for routing inbound datagrams. Snapshots clone `Arc` handles, so
//! broadcast iteration never blocks mutators.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::net::session::Session;

/// Process-wide session id source. Ids stay unique even when several
/// registries coexist (as they do in tests).
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(0);

/// Thread-safe registry of raw connections and bound sessions.
pub struct SessionRegistry {
    /// In-flight handshakes: connection id to peer stream address.
    raw: RwLock<HashMap<u64, SocketAddr>>,
    /// Fully bound sessions by id.
    sessions: RwLock<HashMap<u64, Arc<Session>>>,
    /// Datagram endpoint to session id, kept in sync with `sessions`.
    by_endpoint: RwLock<HashMap<SocketAddr, u64>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            raw: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            by_endpoint: RwLock::new(HashMap::new()),
        }
    }

    /// Allocate the next connection/session id.
    pub fn allocate_id(&self) -> u64 {
        NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Track a raw stream connection that has not completed its handshake.
    pub async fn register_raw(&self, id: u64, peer: SocketAddr) {
        self.raw.write().await.insert(id, peer);
    }

    /// Drop a raw connection entry (handshake finished either way).
    pub async fn unregister_raw(&self, id: u64) {
        self.raw.write().await.remove(&id);
    }

    /// Number of in-flight handshakes.
    pub async fn raw_count(&self) -> usize {
        self.raw.read().await.len()
    }

    /// Register a bound session and index its datagram endpoint.
    ///
    /// The endpoint index is written first so a concurrent lookup never
    /// observes a session that is missing from the index.
    pub async fn register(&self, session: Arc<Session>) {
        let endpoint = session.datagram_endpoint();
        self.by_endpoint.write().await.insert(endpoint, session.id());
        self.sessions.write().await.insert(session.id(), session);
        debug!(endpoint = %endpoint, "session registered");
    }

    /// Remove a session and its endpoint index entry. Safe to call twice;
    /// the second call finds nothing.
    pub async fn unregister(&self, id: u64) {
        let removed = self.sessions.write().await.remove(&id);
        if let Some(session) = removed {
            self.by_endpoint
                .write()
                .await
                .remove(&session.datagram_endpoint());
        }
    }

    /// Number of bound sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Point-in-time copy of all bound sessions for iteration. Mutators
    /// proceed as soon as the read lock is released; the returned handles
    /// stay valid regardless.
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Look up a session by its bound datagram endpoint (address + port).
    pub async fn by_endpoint(&self, endpoint: SocketAddr) -> Option<Arc<Session>> {
        let id = *self.by_endpoint.read().await.get(&endpoint)?;
        self.sessions.read().await.get(&id).cloned()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::session::tests::bound_session;

    #[tokio::test]
    async fn test_raw_register_unregister() {
        let registry = SessionRegistry::new();
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();

        registry.register_raw(1, addr).await;
        registry.register_raw(2, addr).await;
        assert_eq!(registry.raw_count().await, 2);

        registry.unregister_raw(1).await;
        assert_eq!(registry.raw_count().await, 1);
        // Unknown ids are a no-op.
        registry.unregister_raw(99).await;
        assert_eq!(registry.raw_count().await, 1);
    }

    #[tokio::test]
    async fn test_lookup_by_endpoint() {
        let (session, registry) = bound_session().await;

        let found = registry
            .by_endpoint(session.datagram_endpoint())
            .await
            .expect("endpoint should resolve");
        assert_eq!(found.id(), session.id());

        let missing: SocketAddr = "127.0.0.1:1".parse().unwrap();
        assert!(registry.by_endpoint(missing).await.is_none());
    }

    #[tokio::test]
    async fn test_unregister_clears_endpoint_index() {
        let (session, registry) = bound_session().await;
        let endpoint = session.datagram_endpoint();

        registry.unregister(session.id()).await;
        assert_eq!(registry.session_count().await, 0);
        assert!(registry.by_endpoint(endpoint).await.is_none());

        // A second unregister finds nothing and does not panic.
        registry.unregister(session.id()).await;
    }

    #[tokio::test]
    async fn test_snapshot_is_point_in_time() {
        let (session, registry) = bound_session().await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);

        registry.unregister(session.id()).await;
        // The earlier snapshot still holds its handle.
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id(), session.id());
        assert!(registry.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_allocated_ids_strictly_increase() {
        let registry = SessionRegistry::new();
        let a = registry.allocate_id();
        let b = registry.allocate_id();
        let c = registry.allocate_id();
        assert!(a < b && b < c);
    }
}
