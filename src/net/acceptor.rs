//! Acceptor
//!
//! Owns the stream listener and the shared datagram socket, and drives
//! the handshake that binds the two transports into a session.
//!
//! Per connection the handshake walks four states:
//!
//! ```text
//! Issued ──▶ Awaiting-datagram ──▶ Bound ──▶ (authenticated, read loop)
//!    │               │
//!    └───────────────┴──▶ Failed (timeout, auth failure, I/O error)
//! ```
//!
//! The server sends `HANDSHAKE|<nonce>|<stream-address>|<datagram-port>`
//! on the stream; the client proves it owns both transports by echoing
//! the nonce on the datagram socket. Once bound, the datagram path is
//! trusted by endpoint alone (matching the original protocol); a hardened
//! variant would sign datagrams or require a session token prefix.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::lifecycle::{Component, ComponentState, LifecycleCell};
use crate::net::auth::Authenticator;
use crate::net::registry::SessionRegistry;
use crate::net::session::{Session, SessionMetrics};
use crate::net::stream::StreamIo;
use crate::server::ServerError;

/// Prefix of the handshake line and of the client's handshake datagram.
pub const HANDSHAKE_PREFIX: &str = "HANDSHAKE|";
/// Payload of the server's handshake acknowledgement datagram.
pub const HANDSHAKE_ACK: &str = "HANDSHAKE_ACK";

/// Receive buffer for the datagram listener. Comfortably above the
/// sequence prefix plus the maximum payload.
const RECV_BUFFER_LEN: usize = 2048;

/// How long the accept loop waits before re-checking a full house.
const CAPACITY_RECHECK: Duration = Duration::from_millis(200);

/// A datagram accepted on a bound session, handed to the game layer.
#[derive(Debug)]
pub struct InboundDatagram {
    /// The session it arrived on.
    pub session_id: u64,
    /// Payload with the sequence prefix already stripped.
    pub payload: Vec<u8>,
}

/// One in-flight handshake, resolved by the datagram listener with the
/// peer's datagram endpoint.
struct PendingHandshake {
    resolve: oneshot::Sender<SocketAddr>,
}

/// State shared between the acceptor's tasks.
struct AcceptorShared {
    registry: Arc<SessionRegistry>,
    authenticator: Authenticator,
    socket: Arc<UdpSocket>,
    stream_addr: SocketAddr,
    datagram_addr: SocketAddr,
    max_sessions: usize,
    handshake_timeout: Duration,
    welcome: String,
    /// Pending handshakes by nonce. Touched only from acceptor-owned
    /// tasks.
    pending: Mutex<HashMap<Uuid, PendingHandshake>>,
    inbound_tx: mpsc::UnboundedSender<InboundDatagram>,
}

/// Accepts stream connections, routes datagrams, and produces sessions.
pub struct Acceptor {
    shared: Arc<AcceptorShared>,
    /// Held until `start`, then moved into the accept task and dropped
    /// with it.
    listener: Mutex<Option<TcpListener>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    state: LifecycleCell,
}

impl Acceptor {
    /// Bind both listeners. Loops do not run until [`Component::start`].
    pub async fn bind(
        config: &ServerConfig,
        registry: Arc<SessionRegistry>,
        inbound_tx: mpsc::UnboundedSender<InboundDatagram>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.stream_bind).await?;
        let socket = Arc::new(UdpSocket::bind(config.datagram_bind).await?);
        let stream_addr = listener.local_addr()?;
        let datagram_addr = socket.local_addr()?;
        info!(%stream_addr, %datagram_addr, "listeners bound");

        Ok(Self {
            shared: Arc::new(AcceptorShared {
                registry,
                authenticator: Authenticator::new(
                    config.shared_secret.as_bytes().to_vec(),
                    config.auth_timeout,
                ),
                socket,
                stream_addr,
                datagram_addr,
                max_sessions: config.max_sessions,
                handshake_timeout: config.handshake_timeout,
                welcome: config.welcome.clone(),
                pending: Mutex::new(HashMap::new()),
                inbound_tx,
            }),
            listener: Mutex::new(Some(listener)),
            tasks: Mutex::new(Vec::new()),
            state: LifecycleCell::new(),
        })
    }

    /// Actual stream listener address (useful when bound to port 0).
    pub fn stream_addr(&self) -> SocketAddr {
        self.shared.stream_addr
    }

    /// Actual datagram socket address.
    pub fn datagram_addr(&self) -> SocketAddr {
        self.shared.datagram_addr
    }

    /// Number of handshakes currently awaiting their datagram.
    pub async fn pending_count(&self) -> usize {
        self.shared.pending.lock().await.len()
    }
}

impl AcceptorShared {
    /// Stream listener loop. The session cap is enforced before accepting
    /// a connection, and it counts bound sessions; in-flight handshakes
    /// are bounded by their own timeout instead.
    async fn run_accept_loop(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) {
        info!(addr = %self.stream_addr, "stream listener started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            if self.registry.session_count().await >= self.max_sessions {
                warn!(max = self.max_sessions, "at session capacity, holding accepts");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(CAPACITY_RECHECK) => continue,
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = listener.accept() => match result {
                    Ok((stream, peer)) => {
                        let id = self.registry.allocate_id();
                        self.registry.register_raw(id, peer).await;
                        info!(conn = id, %peer, "stream connected");

                        let shared = self.clone();
                        let token = shutdown.clone();
                        tokio::spawn(async move {
                            shared.drive_handshake(id, stream, peer, token).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "stream accept error");
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
            }
        }

        info!("stream listener stopped");
    }

    /// One handshake driver: Issued, Awaiting-datagram, then Bound or
    /// Failed. On success this task becomes the session's read loop.
    async fn drive_handshake(
        self: Arc<Self>,
        id: u64,
        stream: TcpStream,
        peer: SocketAddr,
        shutdown: CancellationToken,
    ) {
        let metrics = Arc::new(SessionMetrics::new());
        let stream_io = StreamIo::new(stream, metrics.clone());
        let nonce = Uuid::new_v4();

        let (resolve_tx, resolve_rx) = oneshot::channel();
        self.pending
            .lock()
            .await
            .insert(nonce, PendingHandshake { resolve: resolve_tx });

        // Issued: tell the client where to echo the nonce.
        let line = format!(
            "{}{}|{}|{}",
            HANDSHAKE_PREFIX,
            nonce,
            self.stream_addr,
            self.datagram_addr.port()
        );
        if let Err(e) = stream_io.write_line(&line).await {
            debug!(conn = id, error = %e, "handshake line failed");
            self.abort_handshake(id, nonce, &stream_io).await;
            return;
        }

        // Awaiting-datagram: the datagram listener resolves the slot.
        let endpoint = tokio::select! {
            _ = shutdown.cancelled() => None,
            result = timeout(self.handshake_timeout, resolve_rx) => match result {
                Ok(Ok(endpoint)) => Some(endpoint),
                Ok(Err(_)) | Err(_) => None,
            },
        };
        let Some(endpoint) = endpoint else {
            debug!(conn = id, %nonce, "handshake datagram never arrived");
            self.abort_handshake(id, nonce, &stream_io).await;
            return;
        };

        // Bound: the session exists from here on, never half-bound.
        let session = Session::bind(
            id,
            nonce,
            stream_io,
            self.socket.clone(),
            endpoint,
            Arc::downgrade(&self.registry),
            metrics,
        );
        self.registry.register(session.clone()).await;
        self.registry.unregister_raw(id).await;
        info!(
            session = id,
            nonce = %session.nonce_prefix(),
            %peer,
            datagram = %endpoint,
            "transports bound"
        );

        // The ack is the session's first outbound datagram, so it carries
        // sequence 1.
        if let Err(e) = session.datagram().send(HANDSHAKE_ACK.as_bytes()).await {
            debug!(session = id, error = %e, "handshake ack send failed");
        }

        match self.authenticator.authenticate(&session).await {
            Ok(()) => {
                if let Err(e) = session.stream().write_line(&self.welcome).await {
                    debug!(session = id, error = %e, "welcome line failed");
                    session.disconnect().await;
                    return;
                }
                info!(session = id, "session authenticated");
                self.run_session_loop(session, shutdown).await;
            }
            Err(_) => {
                // Already logged by the authenticator.
                session.disconnect().await;
            }
        }
    }

    /// Failed state: remove the pending slot, close the stream, drop the
    /// raw-connection entry.
    async fn abort_handshake(&self, id: u64, nonce: Uuid, stream_io: &StreamIo) {
        self.pending.lock().await.remove(&nonce);
        stream_io.shutdown().await;
        self.registry.unregister_raw(id).await;
    }

    /// Post-auth stream read loop. Lines are the control channel; an I/O
    /// error or shutdown tears the session down.
    async fn run_session_loop(&self, session: Arc<Session>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    session.disconnect().await;
                    break;
                }
                result = session.stream().read_line() => match result {
                    Ok(line) => {
                        debug!(session = session.id(), %line, "control line");
                    }
                    Err(e) => {
                        if e.is_routine() {
                            debug!(session = session.id(), error = %e, "stream closed");
                        } else {
                            error!(session = session.id(), error = %e, "stream error");
                        }
                        session.disconnect().await;
                        break;
                    }
                },
            }
        }
    }

    /// Datagram listener loop over the shared socket.
    async fn run_datagram_loop(self: Arc<Self>, shutdown: CancellationToken) {
        info!(addr = %self.datagram_addr, "datagram listener started");
        let mut buf = vec![0u8; RECV_BUFFER_LEN];

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok((len, from)) => self.route_datagram(&buf[..len], from).await,
                    Err(e) => {
                        error!(error = %e, "datagram receive error");
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
            }
        }

        info!("datagram listener stopped");
    }

    /// Route one inbound datagram: handshake echoes resolve their pending
    /// slot; everything else is delivered to the owning session by sender
    /// endpoint. Unknown endpoints and malformed text are dropped.
    async fn route_datagram(&self, data: &[u8], from: SocketAddr) {
        // Handshake datagrams are sent raw, before any session exists, so
        // the leading bytes are UTF-8 text rather than a sequence prefix.
        if data.starts_with(HANDSHAKE_PREFIX.as_bytes()) {
            let nonce = std::str::from_utf8(&data[HANDSHAKE_PREFIX.len()..])
                .ok()
                .and_then(|text| Uuid::parse_str(text.trim()).ok());

            match nonce {
                Some(nonce) => match self.pending.lock().await.remove(&nonce) {
                    Some(entry) => {
                        debug!(%nonce, %from, "handshake datagram matched");
                        let _ = entry.resolve.send(from);
                    }
                    // Duplicates after resolution land here and are
                    // dropped silently.
                    None => debug!(%nonce, %from, "handshake datagram with no pending entry"),
                },
                None => debug!(%from, "malformed handshake datagram"),
            }
            return;
        }

        match self.registry.by_endpoint(from).await {
            Some(session) => match session.datagram().accept(data) {
                Ok(payload) => {
                    let _ = self.inbound_tx.send(InboundDatagram {
                        session_id: session.id(),
                        payload,
                    });
                }
                Err(e) => debug!(session = session.id(), error = %e, "datagram dropped"),
            },
            None => debug!(%from, len = data.len(), "datagram from unknown endpoint"),
        }
    }
}

impl Component for Acceptor {
    fn name(&self) -> &'static str {
        "acceptor"
    }

    fn state(&self) -> ComponentState {
        self.state.get()
    }

    fn start(&self, shutdown: CancellationToken) -> BoxFuture<'_, Result<(), ServerError>> {
        async move {
            self.state.set(ComponentState::Loading);

            let listener = self
                .listener
                .lock()
                .await
                .take()
                .ok_or_else(|| ServerError::Internal("acceptor already started".into()))?;

            let mut tasks = self.tasks.lock().await;
            tasks.push(tokio::spawn(
                self.shared.clone().run_accept_loop(listener, shutdown.clone()),
            ));
            tasks.push(tokio::spawn(
                self.shared.clone().run_datagram_loop(shutdown),
            ));

            self.state.set(ComponentState::Running);
            Ok(())
        }
        .boxed()
    }

    fn stop(&self) -> BoxFuture<'_, Result<(), ServerError>> {
        async move {
            self.state.set(ComponentState::Stopping);

            // Sessions first, so their read loops unblock promptly.
            for session in self.shared.registry.snapshot().await {
                session.disconnect().await;
            }

            for task in self.tasks.lock().await.drain(..) {
                let _ = task.await;
            }

            self.state.set(ComponentState::Stopped);
            Ok(())
        }
        .boxed()
    }
}
