//! Network Layer
//!
//! Dual-transport plumbing: TCP stream framing, UDP datagram framing, the
//! session registry, challenge-response authentication, and the acceptor
//! that binds the two transports into a session.

pub mod acceptor;
pub mod auth;
pub mod datagram;
pub mod registry;
pub mod session;
pub mod stream;
pub mod wire;

pub use acceptor::{Acceptor, InboundDatagram};
pub use auth::{AuthError, Authenticator};
pub use datagram::DatagramIo;
pub use registry::SessionRegistry;
pub use session::{MetricsSnapshot, Session, SessionMetrics};
pub use stream::StreamIo;

/// Transport errors shared by the stream and datagram layers.
///
/// The first four variants are framing violations; the rest are the
/// everyday transport failures that log at debug rather than error.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Peer closed the stream.
    #[error("connection closed by peer")]
    Closed,

    /// Binary frame length exceeds the 10 MiB ceiling.
    #[error("frame length {0} exceeds limit")]
    FrameTooLarge(u32),

    /// Binary frame with a zero-length payload.
    #[error("zero-length frame")]
    EmptyFrame,

    /// Outbound datagram payload exceeds the per-datagram ceiling.
    #[error("datagram payload of {0} bytes exceeds limit")]
    DatagramTooLarge(usize),

    /// Inbound datagram shorter than the sequence prefix.
    #[error("datagram shorter than the 4-byte sequence prefix")]
    DatagramTooShort,

    /// Inbound datagram not strictly newer than the last accepted one.
    /// Normal under reordering; dropped silently by callers.
    #[error("stale datagram sequence {seq} (last accepted {last})")]
    StaleSequence {
        /// Sequence carried by the rejected datagram.
        seq: u32,
        /// Last sequence accepted on this session.
        last: u32,
    },

    /// Underlying socket error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetError {
    /// Whether this error is routine transport noise (peer went away,
    /// stale datagram) as opposed to something worth an error-level log.
    pub fn is_routine(&self) -> bool {
        match self {
            NetError::Closed | NetError::StaleSequence { .. } => true,
            NetError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}
