//! Background refresh monitor
//!
//! Wakes on a fixed tick and refreshes every data type whose cached entry is
//! absent or older than its `refresh_interval`. A failure for one data type is
//! logged and counted; the cycle goes on with the others.
//!
//! Cancellation stops the loop without waiting for refreshes it started. Those
//! refreshes run on their own tasks and still complete (cache write, subscriber
//! notification, events) or fail within their retry budget.

use crate::coordinator::{RefreshCoordinator, RefreshOutcome, RefreshStatus};
use freshdata_common::events::FreshEvent;
use freshdata_common::time;
use futures::future::join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counters for a running or finished monitor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MonitorStats {
    pub cycles: u64,
    /// Refreshes that cached a new value
    pub refreshes: u64,
    /// Refreshes that degraded or failed
    pub failures: u64,
    pub running: bool,
}

#[derive(Default)]
struct Counters {
    cycles: AtomicU64,
    refreshes: AtomicU64,
    failures: AtomicU64,
    running: AtomicBool,
}

impl Counters {
    fn snapshot(&self) -> MonitorStats {
        MonitorStats {
            cycles: self.cycles.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            running: self.running.load(Ordering::Relaxed),
        }
    }
}

pub struct MonitorLoop {
    coordinator: Arc<RefreshCoordinator>,
    tick: Duration,
}

impl MonitorLoop {
    pub fn new(coordinator: Arc<RefreshCoordinator>, tick: Duration) -> Self {
        Self {
            coordinator,
            tick: tick.max(Duration::from_millis(1)),
        }
    }

    /// Start the loop on the current runtime
    ///
    /// The first cycle runs immediately.
    pub fn spawn(self) -> MonitorHandle {
        let cancel = CancellationToken::new();
        let counters = Arc::new(Counters::default());
        counters.running.store(true, Ordering::Relaxed);

        let task = tokio::spawn(self.run(cancel.clone(), Arc::clone(&counters)));

        MonitorHandle {
            cancel,
            task,
            counters,
        }
    }

    async fn run(self, cancel: CancellationToken, counters: Arc<Counters>) {
        info!(
            tick_ms = self.tick.as_millis() as u64,
            data_types = self.coordinator.registry().len(),
            "Monitor started"
        );
        self.coordinator.event_bus().emit_lossy(FreshEvent::MonitorStarted {
            tick_ms: self.tick.as_millis() as u64,
            timestamp: time::now(),
        });

        let mut timer = interval(self.tick);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Monitor stopped waiting on in-flight refreshes");
                    break;
                }
                _ = self.run_cycle(&counters) => {}
            }
            counters.cycles.fetch_add(1, Ordering::Relaxed);
        }

        counters.running.store(false, Ordering::Relaxed);
        let cycles = counters.cycles.load(Ordering::Relaxed);
        self.coordinator.event_bus().emit_lossy(FreshEvent::MonitorStopped {
            cycles,
            timestamp: time::now(),
        });
        info!(cycles, "Monitor stopped");
    }

    /// Data types whose entry is absent or older than `refresh_interval`
    fn due_ids(&self) -> Vec<String> {
        let now = time::now();
        let cache = self.coordinator.cache();
        self.coordinator
            .registry()
            .iter()
            .filter(|config| match cache.get(&config.id) {
                None => true,
                Some(entry) => entry.age(now) > config.refresh_interval,
            })
            .map(|config| config.id.clone())
            .collect()
    }

    async fn run_cycle(&self, counters: &Counters) {
        let due = self.due_ids();
        if due.is_empty() {
            debug!("Monitor: nothing due");
            return;
        }
        debug!(due = due.len(), "Monitor: refreshing due data types");

        // Due-ness is decided here, so the cache acceptability check is skipped
        let refreshes = due.iter().map(|id| async move {
            (id, self.coordinator.refresh(id, true).await)
        });

        for (id, outcome) in join_all(refreshes).await {
            match outcome {
                Ok(RefreshOutcome {
                    status: RefreshStatus::Degraded { reason },
                    ..
                }) => {
                    counters.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(data_type = %id, "Monitor refresh degraded: {}", reason);
                }
                Ok(_) => {
                    counters.refreshes.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.failures.fetch_add(1, Ordering::Relaxed);
                    error!(data_type = %id, "Monitor refresh failed: {}", e);
                }
            }
        }
    }
}

/// Control handle for a spawned [`MonitorLoop`]
pub struct MonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    counters: Arc<Counters>,
}

impl MonitorHandle {
    pub fn stats(&self) -> MonitorStats {
        self.counters.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.counters.running.load(Ordering::Relaxed)
    }

    /// Token that stops the loop when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel the loop and wait for it to exit
    pub async fn shutdown(self) -> MonitorStats {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!("Monitor task ended abnormally: {}", e);
            self.counters.running.store(false, Ordering::Relaxed);
        }
        self.counters.snapshot()
    }
}
