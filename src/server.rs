//! Game Server
//!
//! Wires the core together: config, registry, dispatcher, acceptor, tick
//! scheduler, and the supervisor that runs their lifecycles. Embedders
//! construct a [`GameServer`], hand the inbound datagram channel to their
//! game module, load the module, and call [`GameServer::run`].

use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::game::GameModule;
use crate::lifecycle::{Component, Supervisor};
use crate::net::acceptor::{Acceptor, InboundDatagram};
use crate::net::registry::SessionRegistry;
use crate::net::session::MetricsSnapshot;
use crate::net::NetError;
use crate::tick::dispatcher::TickDispatcher;
use crate::tick::scheduler::TickScheduler;
use crate::tick::TickKind;
use crate::VERSION;

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind a listener.
    #[error("failed to bind: {0}")]
    Bind(#[from] std::io::Error),

    /// Transport error surfaced to the server layer.
    #[error("network error: {0}")]
    Net(#[from] NetError),

    /// Shutdown finished but some components never reached a terminal
    /// state.
    #[error("shutdown incomplete: {components}")]
    ShutdownIncomplete {
        /// Names of the components that did not stop.
        components: String,
    },

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

// =============================================================================
// STATUS SNAPSHOT
// =============================================================================

/// One tick kind's progress in the status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickStatus {
    /// The tick kind.
    pub kind: TickKind,
    /// Ticks executed since process start.
    pub counter: u64,
}

/// One bound session in the status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    /// Session identifier.
    pub id: u64,
    /// The peer's datagram endpoint.
    pub endpoint: SocketAddr,
    /// Whether the challenge-response completed.
    pub authenticated: bool,
    /// Whether teardown has begun.
    pub disconnecting: bool,
    /// Byte counters and activity timestamps.
    pub metrics: MetricsSnapshot,
}

/// Point-in-time diagnostic snapshot of the whole core, serializable as
/// JSON for status endpoints and operator tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatus {
    /// Crate version the server was built from.
    pub version: String,
    /// In-flight handshakes.
    pub raw_connections: usize,
    /// Registered tick kinds and their counters.
    pub ticks: Vec<TickStatus>,
    /// Bound sessions.
    pub sessions: Vec<SessionStatus>,
}

impl ServerStatus {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

// =============================================================================
// GAME SERVER
// =============================================================================

/// The assembled server core.
pub struct GameServer {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    dispatcher: Arc<TickDispatcher>,
    acceptor: Arc<Acceptor>,
    supervisor: Supervisor,
    /// Receiver half of the inbound datagram channel, handed to the game
    /// module exactly once.
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<InboundDatagram>>>,
}

impl GameServer {
    /// Bind listeners and assemble components. Nothing runs yet; load a
    /// game module and call [`run`](Self::run) (or [`start`](Self::start)).
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let registry = Arc::new(SessionRegistry::new());
        let dispatcher = Arc::new(TickDispatcher::new(registry.clone()));

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let acceptor = Arc::new(Acceptor::bind(&config, registry.clone(), inbound_tx).await?);
        let scheduler = Arc::new(TickScheduler::new(dispatcher.clone()));

        let components: Vec<Arc<dyn Component>> = vec![acceptor.clone(), scheduler];
        let supervisor = Supervisor::new(components);

        Ok(Self {
            config,
            registry,
            dispatcher,
            acceptor,
            supervisor,
            inbound_rx: Mutex::new(Some(inbound_rx)),
        })
    }

    /// Take the inbound datagram channel for the game module. Yields
    /// `None` on the second call.
    pub async fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<InboundDatagram>> {
        self.inbound_rx.lock().await.take()
    }

    /// Load a game module: run its registration against the dispatcher.
    /// A module that panics is logged and the dispatcher stays as it
    /// was — typically empty, leaving the scheduler idle.
    pub fn load_module(&self, module: &dyn GameModule) {
        info!(module = module.name(), "loading game module");
        let result = catch_unwind(AssertUnwindSafe(|| module.initialize(&self.dispatcher)));
        if result.is_err() {
            error!(module = module.name(), "game module failed to load");
        } else if self.dispatcher.is_empty() {
            warn!(module = module.name(), "game module registered no tick processors");
        }
    }

    /// Start every component in order.
    pub async fn start(&self) {
        info!(
            stream = %self.acceptor.stream_addr(),
            datagram = %self.acceptor.datagram_addr(),
            "starting server core"
        );
        self.supervisor.start_all().await;
    }

    /// Trip the shutdown signal and stop components in reverse, each
    /// within the configured grace window.
    pub async fn stop(&self) -> Result<(), ServerError> {
        info!("stopping server core");
        self.supervisor.stop_all(self.config.stop_grace).await
    }

    /// Run until interrupted, then shut down.
    pub async fn run(&self) -> Result<(), ServerError> {
        self.start().await;

        let shutdown = self.supervisor.shutdown_token();
        tokio::select! {
            _ = shutdown.cancelled() => {}
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "signal handler failed");
                }
                info!("interrupt received");
            }
        }

        self.stop().await
    }

    /// The bound stream listener address.
    pub fn stream_addr(&self) -> SocketAddr {
        self.acceptor.stream_addr()
    }

    /// The bound datagram socket address.
    pub fn datagram_addr(&self) -> SocketAddr {
        self.acceptor.datagram_addr()
    }

    /// The session registry (counts, snapshots).
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Collect a diagnostic snapshot: tick counters plus every bound
    /// session's flags and metrics.
    pub async fn status(&self) -> ServerStatus {
        let ticks = self
            .dispatcher
            .registered()
            .into_iter()
            .map(|(kind, _)| TickStatus {
                kind,
                counter: self.dispatcher.counter(kind),
            })
            .collect();

        let sessions = self
            .registry
            .snapshot()
            .await
            .into_iter()
            .map(|session| SessionStatus {
                id: session.id(),
                endpoint: session.datagram_endpoint(),
                authenticated: session.is_authenticated(),
                disconnecting: session.is_disconnecting(),
                metrics: session.metrics().snapshot(),
            })
            .collect();

        ServerStatus {
            version: VERSION.to_string(),
            raw_connections: self.registry.raw_count().await,
            ticks,
            sessions,
        }
    }

    /// The tick dispatcher (counters, registration).
    pub fn dispatcher(&self) -> &Arc<TickDispatcher> {
        &self.dispatcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tick::TickKind;

    fn loopback_config() -> ServerConfig {
        ServerConfig {
            stream_bind: "127.0.0.1:0".parse().unwrap(),
            datagram_bind: "127.0.0.1:0".parse().unwrap(),
            ..ServerConfig::default()
        }
    }

    struct PanickyModule;
    impl GameModule for PanickyModule {
        fn name(&self) -> &str {
            "panicky"
        }
        fn initialize(&self, _dispatcher: &TickDispatcher) {
            panic!("registration exploded");
        }
    }

    struct OneKindModule;
    impl GameModule for OneKindModule {
        fn name(&self) -> &str {
            "one-kind"
        }
        fn initialize(&self, dispatcher: &TickDispatcher) {
            dispatcher.register(TickKind::Movement, 50, Default::default());
        }
    }

    #[tokio::test]
    async fn test_bind_assigns_real_ports() {
        let server = GameServer::bind(loopback_config()).await.unwrap();
        assert_ne!(server.stream_addr().port(), 0);
        assert_ne!(server.datagram_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_take_inbound_is_single_shot() {
        let server = GameServer::bind(loopback_config()).await.unwrap();
        assert!(server.take_inbound().await.is_some());
        assert!(server.take_inbound().await.is_none());
    }

    #[tokio::test]
    async fn test_panicking_module_leaves_dispatcher_empty() {
        let server = GameServer::bind(loopback_config()).await.unwrap();
        server.load_module(&PanickyModule);
        assert!(server.dispatcher().is_empty());

        // The server still starts and stops cleanly with an idle scheduler.
        server.start().await;
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_status_snapshot_json_roundtrip() {
        let server = GameServer::bind(loopback_config()).await.unwrap();
        server.load_module(&OneKindModule);

        let status = server.status().await;
        assert_eq!(status.version, crate::VERSION);
        assert_eq!(status.raw_connections, 0);
        assert_eq!(status.ticks.len(), 1);
        assert_eq!(status.ticks[0].kind, TickKind::Movement);
        assert!(status.sessions.is_empty());

        let json = status.to_json().unwrap();
        assert!(json.contains("\"movement\""));

        let parsed = ServerStatus::from_json(&json).unwrap();
        assert_eq!(parsed.ticks[0].counter, status.ticks[0].counter);
        assert_eq!(parsed.version, status.version);
    }

    #[tokio::test]
    async fn test_start_stop_cycle() {
        let server = GameServer::bind(loopback_config()).await.unwrap();
        server.load_module(&OneKindModule);

        server.start().await;
        assert_eq!(
            server.supervisor.launched().await,
            vec!["acceptor", "tick-scheduler"]
        );
        server.stop().await.unwrap();
    }
}
