//! Arena Module
//!
//! The built-in minimal game: it registers the standard tick kinds at
//! sensible intervals and drains client datagrams through the Movement
//! tick. Real games replace this wholesale; it exists so the server does
//! something observable out of the box and so the integration tests have
//! a complete module to run against.

use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::game::GameModule;
use crate::net::acceptor::InboundDatagram;
use crate::tick::dispatcher::{TickBatch, TickDispatcher, TickHooks};
use crate::tick::TickKind;

/// Movement runs hot; everything else idles along behind it.
const MOVEMENT_INTERVAL_MS: u64 = 50;
const MESSAGING_INTERVAL_MS: u64 = 100;
const SPAWNING_INTERVAL_MS: u64 = 500;
const CLEANUP_INTERVAL_MS: u64 = 1_000;
const COMBAT_INTERVAL_MS: u64 = 50;
const WORLD_INTERVAL_MS: u64 = 200;
const AUTOSAVE_INTERVAL_MS: u64 = 30_000;

/// Minimal built-in game module.
pub struct ArenaModule {
    /// Client datagrams routed here by the acceptor, drained each
    /// Movement tick.
    inbound: Arc<Mutex<mpsc::UnboundedReceiver<InboundDatagram>>>,
}

impl ArenaModule {
    /// Build the module around the acceptor's inbound channel.
    pub fn new(inbound: mpsc::UnboundedReceiver<InboundDatagram>) -> Self {
        Self {
            inbound: Arc::new(Mutex::new(inbound)),
        }
    }
}

impl GameModule for ArenaModule {
    fn name(&self) -> &str {
        "arena"
    }

    fn initialize(&self, dispatcher: &TickDispatcher) {
        // Movement consumes queued client input.
        let probe_rx = self.inbound.clone();
        let flush_rx = self.inbound.clone();
        dispatcher.register(
            TickKind::Movement,
            MOVEMENT_INTERVAL_MS,
            TickHooks::none()
                .on_has_pending(move || {
                    probe_rx
                        .lock()
                        .map(|rx| !rx.is_empty())
                        .unwrap_or(false)
                })
                .on_flush(move || {
                    let mut batch = Vec::new();
                    if let Ok(mut rx) = flush_rx.lock() {
                        while let Ok(datagram) = rx.try_recv() {
                            batch.push(datagram);
                        }
                    }
                    Box::new(batch) as TickBatch
                })
                .on_process(|batch| {
                    async move {
                        if let Ok(inputs) = batch.downcast::<Vec<InboundDatagram>>() {
                            for input in inputs.iter() {
                                trace!(
                                    session = input.session_id,
                                    len = input.payload.len(),
                                    "movement input"
                                );
                            }
                            debug!(count = inputs.len(), "movement batch processed");
                        }
                    }
                    .boxed()
                }),
        );

        // The rest of the kinds only announce themselves for now; default
        // hooks mean the tick datagram still goes out on schedule.
        dispatcher.register(TickKind::Messaging, MESSAGING_INTERVAL_MS, TickHooks::none());
        dispatcher.register(TickKind::ObjectSpawning, SPAWNING_INTERVAL_MS, TickHooks::none());
        dispatcher.register(TickKind::ObjectCleanup, CLEANUP_INTERVAL_MS, TickHooks::none());
        dispatcher.register(TickKind::Combat, COMBAT_INTERVAL_MS, TickHooks::none());
        dispatcher.register(TickKind::WorldSimulation, WORLD_INTERVAL_MS, TickHooks::none());
        dispatcher.register(TickKind::AutoSave, AUTOSAVE_INTERVAL_MS, TickHooks::none());
    }
}
