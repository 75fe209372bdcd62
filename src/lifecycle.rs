//! Component Lifecycle
//!
//! The 5-state component machine and the supervisor that drives it. The
//! supervisor owns the process-wide shutdown token, starts components in
//! configuration order, and stops them in reverse with a bounded grace
//! window per component.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::server::ServerError;

/// Lifecycle states. Transitions are driven only by `start` and `stop`:
/// `New → Loading → Running → Stopping → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ComponentState {
    /// Constructed, never started.
    New = 0,
    /// `start` in progress.
    Loading = 1,
    /// `start` returned successfully.
    Running = 2,
    /// `stop` in progress.
    Stopping = 3,
    /// `stop` returned.
    Stopped = 4,
}

impl ComponentState {
    /// Whether this state is acceptable at the end of shutdown.
    pub fn is_terminal(self) -> bool {
        matches!(self, ComponentState::Stopping | ComponentState::Stopped)
    }
}

/// Atomic state holder components embed.
pub struct LifecycleCell(AtomicU8);

impl LifecycleCell {
    /// A cell in the `New` state.
    pub fn new() -> Self {
        Self(AtomicU8::new(ComponentState::New as u8))
    }

    /// Record a state transition.
    pub fn set(&self, state: ComponentState) {
        self.0.store(state as u8, Ordering::Relaxed);
    }

    /// Current state.
    pub fn get(&self) -> ComponentState {
        match self.0.load(Ordering::Relaxed) {
            0 => ComponentState::New,
            1 => ComponentState::Loading,
            2 => ComponentState::Running,
            3 => ComponentState::Stopping,
            _ => ComponentState::Stopped,
        }
    }
}

impl Default for LifecycleCell {
    fn default() -> Self {
        Self::new()
    }
}

/// A long-lived part of the server the supervisor starts and stops.
pub trait Component: Send + Sync {
    /// Stable name used in logs.
    fn name(&self) -> &'static str;

    /// Current lifecycle state.
    fn state(&self) -> ComponentState;

    /// Bring the component up. The token is the process shutdown signal;
    /// every loop the component spawns must observe it.
    fn start(&self, shutdown: CancellationToken) -> BoxFuture<'_, Result<(), ServerError>>;

    /// Tear the component down and wait for its tasks to finish.
    fn stop(&self) -> BoxFuture<'_, Result<(), ServerError>>;
}

/// Starts the configured components in order and stops them in reverse.
///
/// Constructed once at program entry and passed around explicitly; there
/// is no ambient global.
pub struct Supervisor {
    shutdown: CancellationToken,
    components: Vec<Arc<dyn Component>>,
    launched: Mutex<Vec<Arc<dyn Component>>>,
}

impl Supervisor {
    /// Supervisor over an ordered component list.
    pub fn new(components: Vec<Arc<dyn Component>>) -> Self {
        Self {
            shutdown: CancellationToken::new(),
            components,
            launched: Mutex::new(Vec::new()),
        }
    }

    /// A clone of the process shutdown token.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Start every configured component in order. A failed start is
    /// logged and does not abort the remaining starts; only successful
    /// components join the launched list.
    pub async fn start_all(&self) {
        for component in &self.components {
            match component.start(self.shutdown.child_token()).await {
                Ok(()) => {
                    info!(component = component.name(), "component started");
                    self.launched.lock().await.push(component.clone());
                }
                Err(e) => {
                    error!(component = component.name(), error = %e, "component failed to start");
                }
            }
        }
    }

    /// Trip the shutdown signal, stop launched components in reverse
    /// launch order with `grace` per component, then verify every one of
    /// them reached a terminal state.
    pub async fn stop_all(&self, grace: Duration) -> Result<(), ServerError> {
        self.shutdown.cancel();

        let launched = self.launched.lock().await;
        for component in launched.iter().rev() {
            match timeout(grace, component.stop()).await {
                Ok(Ok(())) => info!(component = component.name(), "component stopped"),
                Ok(Err(e)) => {
                    warn!(component = component.name(), error = %e, "component stop failed")
                }
                Err(_) => warn!(
                    component = component.name(),
                    grace_ms = grace.as_millis() as u64,
                    "component exceeded stop grace"
                ),
            }
        }

        let stragglers: Vec<&'static str> = launched
            .iter()
            .filter(|c| !c.state().is_terminal())
            .map(|c| c.name())
            .collect();

        if stragglers.is_empty() {
            Ok(())
        } else {
            for name in &stragglers {
                error!(component = name, "component did not reach a terminal state");
            }
            Err(ServerError::ShutdownIncomplete {
                components: stragglers.join(", "),
            })
        }
    }

    /// Names of the components that started successfully.
    pub async fn launched(&self) -> Vec<&'static str> {
        self.launched.lock().await.iter().map(|c| c.name()).collect()
    }
}
