//! Tick Dispatcher
//!
//! Holds the processor registry a game module populates at startup and,
//! for every tick, runs any pending game work and broadcasts the fixed
//! 21-byte tick datagram to all authenticated sessions. The module is
//! untrusted for liveness: every callback runs inside a catch-and-log
//! scope and the broadcast happens regardless.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::{debug, error, trace};

use crate::net::registry::SessionRegistry;
use crate::net::wire::encode_tick_packet;
use crate::tick::TickKind;

/// Opaque batch of pending game work, produced by `flush_pending` and
/// consumed by `process_batch`. The core never looks inside.
pub type TickBatch = Box<dyn Any + Send>;

/// Predicate telling the dispatcher whether a kind has queued work.
pub type PendingProbe = Box<dyn Fn() -> bool + Send + Sync>;
/// Producer draining queued work into a batch.
pub type BatchSource = Box<dyn Fn() -> TickBatch + Send + Sync>;
/// Async consumer of a drained batch.
pub type BatchProcessor = Box<dyn Fn(TickBatch) -> BoxFuture<'static, ()> + Send + Sync>;

/// The callbacks a game module attaches to one tick kind. Any hook left
/// unset falls back to its default: always-pending, empty batch, no-op
/// processor. Broadcast happens either way.
#[derive(Default)]
pub struct TickHooks {
    /// Optional pending-work predicate.
    pub has_pending: Option<PendingProbe>,
    /// Optional batch producer.
    pub flush_pending: Option<BatchSource>,
    /// Optional batch consumer.
    pub process_batch: Option<BatchProcessor>,
}

impl TickHooks {
    /// Hooks with every callback defaulted.
    pub fn none() -> Self {
        Self::default()
    }

    /// Set the pending-work predicate.
    pub fn on_has_pending(mut self, f: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.has_pending = Some(Box::new(f));
        self
    }

    /// Set the batch producer.
    pub fn on_flush(mut self, f: impl Fn() -> TickBatch + Send + Sync + 'static) -> Self {
        self.flush_pending = Some(Box::new(f));
        self
    }

    /// Set the async batch consumer.
    pub fn on_process(
        mut self,
        f: impl Fn(TickBatch) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    ) -> Self {
        self.process_batch = Some(Box::new(f));
        self
    }
}

struct ProcessorEntry {
    interval: Duration,
    hooks: TickHooks,
}

/// Dispatches tick work and broadcasts tick datagrams.
pub struct TickDispatcher {
    registry: Arc<SessionRegistry>,
    /// Processor table. Written only during game-module registration,
    /// before the tick loops start; read on every tick.
    entries: RwLock<HashMap<TickKind, ProcessorEntry>>,
    /// Per-kind tick counters, indexed by wire value. Reset only by
    /// process restart.
    counters: [AtomicU64; TickKind::ALL.len()],
}

impl TickDispatcher {
    /// Create a dispatcher broadcasting through `registry`.
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            entries: RwLock::new(HashMap::new()),
            counters: Default::default(),
        }
    }

    /// Install (or replace) the processor for a tick kind. Re-registering
    /// a kind overwrites the previous entry; it never duplicates loops.
    pub fn register(&self, kind: TickKind, interval_ms: u64, hooks: TickHooks) {
        let previous = self
            .entries
            .write()
            .expect("processor table lock poisoned")
            .insert(
                kind,
                ProcessorEntry {
                    interval: Duration::from_millis(interval_ms.max(1)),
                    hooks,
                },
            );

        if previous.is_some() {
            debug!(%kind, interval_ms, "tick processor replaced");
        } else {
            debug!(%kind, interval_ms, "tick processor registered");
        }
    }

    /// Registered kinds and their intervals, in wire order. The scheduler
    /// spawns one loop per entry.
    pub fn registered(&self) -> Vec<(TickKind, Duration)> {
        let entries = self.entries.read().expect("processor table lock poisoned");
        let mut kinds: Vec<_> = entries
            .iter()
            .map(|(kind, entry)| (*kind, entry.interval))
            .collect();
        kinds.sort_by_key(|(kind, _)| kind.wire_value());
        kinds
    }

    /// Whether no processors are registered.
    pub fn is_empty(&self) -> bool {
        self.entries
            .read()
            .expect("processor table lock poisoned")
            .is_empty()
    }

    /// Current counter for a kind. Zero until the first tick.
    pub fn counter(&self, kind: TickKind) -> u64 {
        self.counters[kind.wire_value() as usize].load(Ordering::Relaxed)
    }

    /// Run one tick of `kind`: advance the counter, execute pending game
    /// work, then broadcast the tick datagram to every authenticated,
    /// non-disconnecting session.
    pub async fn process_tick(&self, kind: TickKind) {
        let count = self.counters[kind.wire_value() as usize].fetch_add(1, Ordering::Relaxed) + 1;

        // Everything touching the processor table happens synchronously in
        // this block so the guard is gone before the first await.
        let work = {
            let entries = self.entries.read().expect("processor table lock poisoned");
            let Some(entry) = entries.get(&kind) else {
                return;
            };

            let pending = match &entry.hooks.has_pending {
                Some(probe) => catch_unwind(AssertUnwindSafe(|| probe())).unwrap_or_else(|_| {
                    error!(%kind, "has_pending hook panicked");
                    false
                }),
                None => true,
            };

            if pending {
                let batch: TickBatch = match &entry.hooks.flush_pending {
                    Some(flush) => match catch_unwind(AssertUnwindSafe(|| flush())) {
                        Ok(batch) => batch,
                        Err(_) => {
                            error!(%kind, "flush_pending hook panicked");
                            Box::new(())
                        }
                    },
                    None => Box::new(()),
                };
                match &entry.hooks.process_batch {
                    Some(f) => match catch_unwind(AssertUnwindSafe(|| f(batch))) {
                        Ok(fut) => Some(fut),
                        Err(_) => {
                            error!(%kind, "process_batch hook panicked");
                            None
                        }
                    },
                    None => None,
                }
            } else {
                None
            }
        };

        if let Some(fut) = work {
            if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
                error!(%kind, tick = count, "process_batch hook panicked");
            }
        }

        self.broadcast(kind, count).await;
    }

    async fn broadcast(&self, kind: TickKind, count: u64) {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;
        let packet = encode_tick_packet(kind, count, timestamp_ms);

        let sessions = self.registry.snapshot().await;
        let mut delivered = 0usize;
        for session in sessions {
            if !session.is_authenticated() || session.is_disconnecting() {
                continue;
            }
            match session.datagram().send(&packet).await {
                Ok(_) => delivered += 1,
                Err(e) => debug!(
                    session = session.id(),
                    %kind,
                    error = %e,
                    "tick datagram send failed"
                ),
            }
        }

        trace!(%kind, tick = count, delivered, "tick broadcast");
    }
}
