//! Event types and the event bus
//!
//! Provides the shared event definitions and EventBus used by the engine to
//! publish cache, validation and source-health changes.

use crate::freshness::FreshnessTier;
use crate::types::ReadingValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// freshdata event types
///
/// Events are broadcast via EventBus and serialize to tagged JSON for any
/// push transport a presentation layer chooses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FreshEvent {
    /// A data type's cached value was replaced by a validated one
    CacheUpdated {
        data_type_id: String,
        value: ReadingValue,
        /// Agreement score (0-100)
        confidence_score: f64,
        source_ids: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// A refresh could not produce a fresh value; cached data is served degraded
    RefreshDegraded {
        data_type_id: String,
        reason: String,
        /// Tier of the entry still being served
        served_tier: FreshnessTier,
        timestamp: DateTime<Utc>,
    },

    /// A validation pass finished and was recorded in the ledger
    ValidationCompleted {
        data_type_id: String,
        sequence_id: u64,
        passed: bool,
        confidence_score: Option<f64>,
        issue_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A source switched between healthy and unhealthy
    SourceHealthChanged {
        source_id: String,
        healthy: bool,
        timestamp: DateTime<Utc>,
    },

    /// Background monitor started
    MonitorStarted {
        tick_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Background monitor stopped
    MonitorStopped {
        cycles: u64,
        timestamp: DateTime<Utc>,
    },
}

impl FreshEvent {
    /// Data type the event concerns, if any
    pub fn data_type_id(&self) -> Option<&str> {
        match self {
            FreshEvent::CacheUpdated { data_type_id, .. }
            | FreshEvent::RefreshDegraded { data_type_id, .. }
            | FreshEvent::ValidationCompleted { data_type_id, .. } => Some(data_type_id),
            FreshEvent::SourceHealthChanged { .. }
            | FreshEvent::MonitorStarted { .. }
            | FreshEvent::MonitorStopped { .. } => None,
        }
    }
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use freshdata_common::events::{EventBus, FreshEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(FreshEvent::MonitorStarted {
///     tick_ms: 10_000,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(matches!(rx.try_recv(), Ok(FreshEvent::MonitorStarted { .. })));
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FreshEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<FreshEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: FreshEvent,
    ) -> Result<usize, broadcast::error::SendError<FreshEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: FreshEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
