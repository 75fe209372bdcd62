//! Datagram I/O
//!
//! Per-session wrapper over the shared UDP socket, bound to the remote
//! endpoint learned at handshake. Every outbound datagram carries a 4-byte
//! little-endian sequence prefix; inbound datagrams are accepted only when
//! strictly newer under serial arithmetic. The channel is lossy by design:
//! there is no retransmission, and send failures never drop a session.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::debug;

use crate::net::session::SessionMetrics;
use crate::net::wire::{seq_gap, seq_newer, MAX_DATAGRAM_PAYLOAD, SEQ_PREFIX_LEN};
use crate::net::NetError;

/// Sequence-framed datagram I/O for one session.
///
/// Created once at session construction and reused; the sequence counters
/// live here, so recreating this per call would corrupt the sequence
/// space.
pub struct DatagramIo {
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
    last_sent: AtomicU32,
    last_received: AtomicU32,
    metrics: Arc<SessionMetrics>,
}

impl DatagramIo {
    /// Bind a sender/receiver pair to the session's remote endpoint.
    /// The socket is borrowed from the acceptor and never closed here.
    pub fn new(socket: Arc<UdpSocket>, remote: SocketAddr, metrics: Arc<SessionMetrics>) -> Self {
        metrics.stamp_datagram_activity();
        Self {
            socket,
            remote,
            last_sent: AtomicU32::new(0),
            last_received: AtomicU32::new(0),
            metrics,
        }
    }

    /// The remote endpoint learned at handshake.
    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Send one datagram as `[seq | payload]`. The first datagram ever
    /// sent carries sequence 1; the counter wraps at 2^32. Returns the
    /// sequence used.
    pub async fn send(&self, payload: &[u8]) -> Result<u32, NetError> {
        if payload.len() > MAX_DATAGRAM_PAYLOAD {
            return Err(NetError::DatagramTooLarge(payload.len()));
        }

        let seq = self.last_sent.fetch_add(1, Ordering::Relaxed).wrapping_add(1);

        let mut buf = Vec::with_capacity(SEQ_PREFIX_LEN + payload.len());
        buf.extend_from_slice(&seq.to_le_bytes());
        buf.extend_from_slice(payload);

        self.socket.send_to(&buf, self.remote).await?;
        self.metrics.record_datagram_sent(buf.len() as u64);
        Ok(seq)
    }

    /// Accept one raw inbound datagram. Validates the sequence prefix,
    /// drops anything not strictly newer than the last accepted sequence,
    /// and returns the payload for the game layer.
    pub fn accept(&self, datagram: &[u8]) -> Result<Vec<u8>, NetError> {
        if datagram.len() < SEQ_PREFIX_LEN {
            return Err(NetError::DatagramTooShort);
        }

        let seq = u32::from_le_bytes(datagram[..SEQ_PREFIX_LEN].try_into().unwrap());
        let last = self.last_received.load(Ordering::Relaxed);

        if !seq_newer(seq, last) {
            return Err(NetError::StaleSequence { seq, last });
        }

        let gap = seq_gap(last, seq);
        if gap > 1 {
            debug!(
                remote = %self.remote,
                seq,
                lost = gap - 1,
                "datagram loss detected"
            );
        }

        self.last_received.store(seq, Ordering::Relaxed);
        self.metrics.record_datagram_received(datagram.len() as u64);
        Ok(datagram[SEQ_PREFIX_LEN..].to_vec())
    }

    /// Last sequence sent on this session. Zero before the first send.
    pub fn last_sent(&self) -> u32 {
        self.last_sent.load(Ordering::Relaxed)
    }

    /// Last sequence accepted from the peer. Zero before the first accept.
    pub fn last_received(&self) -> u32 {
        self.last_received.load(Ordering::Relaxed)
    }

    /// Whether no datagram has been received for `threshold`. Diagnostic
    /// only; the stream decides session liveness.
    pub fn is_idle(&self, threshold: Duration) -> bool {
        self.metrics.datagram_idle_for() >= threshold
    }
}
