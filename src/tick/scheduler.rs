//! Tick Scheduler
//!
//! One independent loop per registered tick kind. Each iteration invokes
//! the dispatcher, folds the execution time into an exponentially
//! smoothed average, then sleeps for whatever remains of the interval. A
//! tick that overruns its interval fires the next one immediately but
//! accrues no further debt, so there are never catch-up bursts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::lifecycle::{Component, ComponentState, LifecycleCell};
use crate::server::ServerError;
use crate::tick::dispatcher::TickDispatcher;
use crate::tick::TickKind;

/// Smoothing factor for the execution-time average.
const SMOOTHING_ALPHA: f64 = 0.10;

/// Exponentially smoothed execution time for one tick kind.
struct TickTiming {
    smoothed_nanos: AtomicU64,
}

impl TickTiming {
    fn new() -> Self {
        Self {
            smoothed_nanos: AtomicU64::new(0),
        }
    }

    /// Fold a sample in: `new = 0.9 * old + 0.1 * sample`.
    fn record(&self, sample: Duration) {
        let old = self.smoothed_nanos.load(Ordering::Relaxed) as f64;
        let new = old * (1.0 - SMOOTHING_ALPHA) + sample.as_nanos() as f64 * SMOOTHING_ALPHA;
        self.smoothed_nanos.store(new as u64, Ordering::Relaxed);
    }

    fn get(&self) -> Duration {
        Duration::from_nanos(self.smoothed_nanos.load(Ordering::Relaxed))
    }
}

/// Runs the per-kind tick loops.
pub struct TickScheduler {
    dispatcher: Arc<TickDispatcher>,
    timings: Mutex<HashMap<TickKind, Arc<TickTiming>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    state: LifecycleCell,
}

impl TickScheduler {
    /// Create a scheduler over an already-populated dispatcher. Loops are
    /// not started until [`Component::start`].
    pub fn new(dispatcher: Arc<TickDispatcher>) -> Self {
        Self {
            dispatcher,
            timings: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            state: LifecycleCell::new(),
        }
    }

    /// Smoothed execution time for a kind. Zero before its first tick or
    /// for unregistered kinds.
    pub async fn smoothed_exec(&self, kind: TickKind) -> Duration {
        match self.timings.lock().await.get(&kind) {
            Some(timing) => timing.get(),
            None => Duration::ZERO,
        }
    }

    async fn run_loop(
        dispatcher: Arc<TickDispatcher>,
        kind: TickKind,
        interval: Duration,
        timing: Arc<TickTiming>,
        shutdown: CancellationToken,
    ) {
        debug!(%kind, interval_ms = interval.as_millis() as u64, "tick loop started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let started = Instant::now();
            dispatcher.process_tick(kind).await;
            let elapsed = started.elapsed();
            timing.record(elapsed);

            // Compensate for the time the tick itself took; an overrun
            // just means no sleep, never a burst of extra ticks.
            let delay = interval.saturating_sub(elapsed);
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!(%kind, "tick loop stopped");
    }
}

impl Component for TickScheduler {
    fn name(&self) -> &'static str {
        "tick-scheduler"
    }

    fn state(&self) -> ComponentState {
        self.state.get()
    }

    fn start(&self, shutdown: CancellationToken) -> BoxFuture<'_, Result<(), ServerError>> {
        async move {
            self.state.set(ComponentState::Loading);

            let registered = self.dispatcher.registered();
            if registered.is_empty() {
                warn!("no tick processors registered; scheduler is idle");
            }

            let mut timings = self.timings.lock().await;
            let mut tasks = self.tasks.lock().await;
            for (kind, interval) in registered {
                let timing = Arc::new(TickTiming::new());
                timings.insert(kind, timing.clone());
                tasks.push(tokio::spawn(Self::run_loop(
                    self.dispatcher.clone(),
                    kind,
                    interval,
                    timing,
                    shutdown.clone(),
                )));
            }

            self.state.set(ComponentState::Running);
            Ok(())
        }
        .boxed()
    }

    fn stop(&self) -> BoxFuture<'_, Result<(), ServerError>> {
        async move {
            self.state.set(ComponentState::Stopping);
            for task in self.tasks.lock().await.drain(..) {
                let _ = task.await;
            }
            self.state.set(ComponentState::Stopped);
            Ok(())
        }
        .boxed()
    }
}
