//! Session
//!
//! One logical client: a TCP stream and a UDP endpoint welded together by
//! the handshake. A session is constructed only after both transports are
//! bound, so nothing downstream ever observes a half-bound client.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tracing::info;
use uuid::Uuid;

use crate::net::datagram::DatagramIo;
use crate::net::registry::SessionRegistry;
use crate::net::stream::StreamIo;

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

// =============================================================================
// METRICS
// =============================================================================

/// Point-in-time copy of a session's counters, serializable for the
/// status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Total bytes sent over both transports, framing included.
    pub bytes_sent: u64,
    /// Total bytes received over both transports, framing included.
    pub bytes_received: u64,
    /// Unix millis of the last stream activity.
    pub stream_activity_ms: i64,
    /// Unix millis of the last received datagram.
    pub datagram_activity_ms: i64,
    /// Unix millis of login, or zero if never authenticated.
    pub login_ms: i64,
}

/// Byte counters and activity timestamps for one session. Shared between
/// the stream and datagram halves, which stamp it on every transfer.
#[derive(Debug)]
pub struct SessionMetrics {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    stream_activity_ms: AtomicI64,
    datagram_activity_ms: AtomicI64,
    login_ms: AtomicI64,
}

impl SessionMetrics {
    /// Fresh counters, stamped with the current time.
    pub fn new() -> Self {
        let now = unix_millis();
        Self {
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            stream_activity_ms: AtomicI64::new(now),
            datagram_activity_ms: AtomicI64::new(now),
            login_ms: AtomicI64::new(0),
        }
    }

    /// Count outbound stream bytes (framing prefix included).
    pub fn record_stream_sent(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::Relaxed);
        self.stream_activity_ms.store(unix_millis(), Ordering::Relaxed);
    }

    /// Count inbound stream bytes (framing prefix included).
    pub fn record_stream_received(&self, n: u64) {
        self.bytes_received.fetch_add(n, Ordering::Relaxed);
        self.stream_activity_ms.store(unix_millis(), Ordering::Relaxed);
    }

    /// Count outbound datagram bytes (sequence prefix included). Sends do
    /// not refresh the activity timestamp: idleness means nothing heard
    /// from the peer, and the tick broadcast would otherwise mask it.
    pub fn record_datagram_sent(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::Relaxed);
    }

    /// Count inbound datagram bytes (sequence prefix included).
    pub fn record_datagram_received(&self, n: u64) {
        self.bytes_received.fetch_add(n, Ordering::Relaxed);
        self.datagram_activity_ms.store(unix_millis(), Ordering::Relaxed);
    }

    /// Refresh the datagram activity timestamp without counting bytes.
    pub fn stamp_datagram_activity(&self) {
        self.datagram_activity_ms.store(unix_millis(), Ordering::Relaxed);
    }

    /// Record the moment authentication succeeded.
    pub fn stamp_login(&self) {
        self.login_ms.store(unix_millis(), Ordering::Relaxed);
    }

    /// Total bytes sent over both transports.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Total bytes received over both transports.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Unix millis of the last stream activity.
    pub fn stream_activity_ms(&self) -> i64 {
        self.stream_activity_ms.load(Ordering::Relaxed)
    }

    /// Unix millis of the last received datagram (or of binding, before
    /// the first one).
    pub fn datagram_activity_ms(&self) -> i64 {
        self.datagram_activity_ms.load(Ordering::Relaxed)
    }

    /// Unix millis of login, or zero if never authenticated.
    pub fn login_ms(&self) -> i64 {
        self.login_ms.load(Ordering::Relaxed)
    }

    /// Time since the last datagram activity.
    pub fn datagram_idle_for(&self) -> Duration {
        let last = self.datagram_activity_ms.load(Ordering::Relaxed);
        let elapsed = unix_millis().saturating_sub(last);
        Duration::from_millis(elapsed.max(0) as u64)
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bytes_sent: self.bytes_sent(),
            bytes_received: self.bytes_received(),
            stream_activity_ms: self.stream_activity_ms(),
            datagram_activity_ms: self.datagram_activity_ms(),
            login_ms: self.login_ms(),
        }
    }
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// A fully bound client session.
pub struct Session {
    /// Small monotonic identifier, unique for the process lifetime.
    id: u64,
    /// 128-bit handshake nonce that bound the two transports.
    nonce: Uuid,
    stream: StreamIo,
    datagram: DatagramIo,
    authenticated: AtomicBool,
    disconnecting: AtomicBool,
    metrics: Arc<SessionMetrics>,
    /// Back-reference for self-unregistration; weak, because the registry
    /// owns the session.
    registry: Weak<SessionRegistry>,
}

impl Session {
    /// Construct a session from a stream whose datagram endpoint has just
    /// been bound. This is the only constructor: there is no such thing as
    /// a session with one transport.
    pub fn bind(
        id: u64,
        nonce: Uuid,
        stream: StreamIo,
        socket: Arc<UdpSocket>,
        remote_datagram: SocketAddr,
        registry: Weak<SessionRegistry>,
        metrics: Arc<SessionMetrics>,
    ) -> Arc<Self> {
        let datagram = DatagramIo::new(socket, remote_datagram, metrics.clone());
        Arc::new(Self {
            id,
            nonce,
            stream,
            datagram,
            authenticated: AtomicBool::new(false),
            disconnecting: AtomicBool::new(false),
            metrics,
            registry,
        })
    }

    /// Session identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Handshake nonce.
    pub fn nonce(&self) -> Uuid {
        self.nonce
    }

    /// Short log form of the nonce: the first four bytes, hex-encoded.
    pub fn nonce_prefix(&self) -> String {
        hex::encode(&self.nonce.as_bytes()[..4])
    }

    /// The peer's datagram endpoint.
    pub fn datagram_endpoint(&self) -> SocketAddr {
        self.datagram.remote()
    }

    /// Stream I/O for this session. Always the same instance.
    pub fn stream(&self) -> &StreamIo {
        &self.stream
    }

    /// Datagram I/O for this session. Always the same instance.
    pub fn datagram(&self) -> &DatagramIo {
        &self.datagram
    }

    /// Byte counters and activity timestamps.
    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    /// Whether the challenge-response completed successfully.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Relaxed)
    }

    /// Whether teardown has begun. Monotonic: never goes back to false.
    pub fn is_disconnecting(&self) -> bool {
        self.disconnecting.load(Ordering::Relaxed)
    }

    /// Mark the session authenticated and stamp the login time.
    pub fn mark_authenticated(&self) {
        self.authenticated.store(true, Ordering::Relaxed);
        self.metrics.stamp_login();
    }

    /// Tear the session down. Idempotent and safe to call from any failure
    /// path: the first caller closes the stream and unregisters; later
    /// callers see the flag already set and return. The shared datagram
    /// socket is borrowed and left open.
    pub async fn disconnect(&self) {
        if self.disconnecting.swap(true, Ordering::SeqCst) {
            return;
        }

        self.stream.shutdown().await;

        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.id).await;
        }

        info!(
            session = self.id,
            nonce = %self.nonce_prefix(),
            bytes_sent = self.metrics.bytes_sent(),
            bytes_received = self.metrics.bytes_received(),
            "session disconnected"
        );
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("nonce", &self.nonce)
            .field("remote_datagram", &self.datagram.remote())
            .field("authenticated", &self.is_authenticated())
            .field("disconnecting", &self.is_disconnecting())
            .finish()
    }
}
