//! Per-source health tracking
//!
//! A source is `Unknown` until its first fetch, `Healthy` after a success and
//! `Unhealthy` after an exhausted fetch. Transitions between healthy and
//! unhealthy are published as `SourceHealthChanged` events.

use chrono::{DateTime, Utc};
use freshdata_common::events::{EventBus, FreshEvent};
use freshdata_common::time;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Unhealthy,
}

/// Health snapshot for one source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceHealth {
    pub status: HealthStatus,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    /// Wall time of the last successful fetch, retries included
    pub last_latency_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl Default for SourceHealth {
    fn default() -> Self {
        Self {
            status: HealthStatus::Unknown,
            last_success: None,
            last_failure: None,
            last_latency_ms: None,
            consecutive_failures: 0,
            last_error: None,
        }
    }
}

pub struct SourceHealthTracker {
    sources: RwLock<BTreeMap<String, SourceHealth>>,
    event_bus: EventBus,
}

impl SourceHealthTracker {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            sources: RwLock::new(BTreeMap::new()),
            event_bus,
        }
    }

    pub fn record_success(&self, source: &str, latency: Duration) {
        let became_healthy = {
            let mut sources = self.sources.write().unwrap_or_else(PoisonError::into_inner);
            let health = sources.entry(source.to_string()).or_default();
            let previous = health.status;
            health.status = HealthStatus::Healthy;
            health.last_success = Some(time::now());
            health.last_latency_ms = Some(latency.as_millis() as u64);
            health.consecutive_failures = 0;
            health.last_error = None;
            previous != HealthStatus::Healthy
        };

        if became_healthy {
            info!(source, "Source healthy");
            self.publish(source, true);
        }
    }

    pub fn record_failure(&self, source: &str, error: &str) {
        let became_unhealthy = {
            let mut sources = self.sources.write().unwrap_or_else(PoisonError::into_inner);
            let health = sources.entry(source.to_string()).or_default();
            let previous = health.status;
            health.status = HealthStatus::Unhealthy;
            health.last_failure = Some(time::now());
            health.consecutive_failures += 1;
            health.last_error = Some(error.to_string());
            previous != HealthStatus::Unhealthy
        };

        if became_unhealthy {
            warn!(source, "Source unhealthy: {}", error);
            self.publish(source, false);
        }
    }

    pub fn get(&self, source: &str) -> Option<SourceHealth> {
        let sources = self.sources.read().unwrap_or_else(PoisonError::into_inner);
        sources.get(source).cloned()
    }

    /// All tracked sources, sorted by name
    pub fn snapshot(&self) -> BTreeMap<String, SourceHealth> {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, source: &str, healthy: bool) {
        self.event_bus.emit_lossy(FreshEvent::SourceHealthChanged {
            source_id: source.to_string(),
            healthy,
            timestamp: time::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_until_first_fetch() {
        let tracker = SourceHealthTracker::new(EventBus::new(8));
        assert!(tracker.get("coinbase").is_none());
        assert_eq!(SourceHealth::default().status, HealthStatus::Unknown);
    }

    #[test]
    fn test_failures_accumulate_and_reset() {
        let tracker = SourceHealthTracker::new(EventBus::new(8));
        tracker.record_failure("coinbase", "HTTP 503");
        tracker.record_failure("coinbase", "HTTP 503");

        let health = tracker.get("coinbase").unwrap();
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.consecutive_failures, 2);
        assert_eq!(health.last_error.as_deref(), Some("HTTP 503"));

        tracker.record_success("coinbase", Duration::from_millis(42));
        let health = tracker.get("coinbase").unwrap();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.last_latency_ms, Some(42));
        assert!(health.last_failure.is_some());
    }

    #[test]
    fn test_events_only_on_transition() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let tracker = SourceHealthTracker::new(bus);

        tracker.record_success("binance", Duration::from_millis(5));
        tracker.record_success("binance", Duration::from_millis(5));
        tracker.record_failure("binance", "timeout");
        tracker.record_failure("binance", "timeout");

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let FreshEvent::SourceHealthChanged { healthy, .. } = event {
                seen.push(healthy);
            }
        }
        assert_eq!(seen, vec![true, false]);
    }
}
