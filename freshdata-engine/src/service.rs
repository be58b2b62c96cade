//! FreshnessService: the context object handed to collaborators
//!
//! Bundles the registry, cache, coordinator, hub, ledger, health tracker and
//! event bus. Built once at startup and passed around explicitly; there is no
//! global instance.

use crate::cache::CacheEntry;
use crate::coordinator::{RefreshCoordinator, RefreshOutcome};
use crate::error::{Error, Result};
use crate::fetch::SourceDirectory;
use crate::health::SourceHealth;
use crate::hub::{SubscriptionId, UpdateHandler};
use crate::ledger::LedgerSummary;
use crate::monitor::{MonitorHandle, MonitorLoop, MonitorStats};
use chrono::{DateTime, Utc};
use freshdata_common::config::TomlConfig;
use freshdata_common::events::{EventBus, FreshEvent};
use freshdata_common::{time, FreshnessTier, ReadingValue};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

/// Value as served to a presentation layer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueView {
    pub data_type_id: String,
    pub value: ReadingValue,
    pub freshness_tier: FreshnessTier,
    pub confidence_score: f64,
    pub fetched_at: DateTime<Utc>,
    pub age_secs: f64,
    /// True when the value could not be refreshed or no longer meets its
    /// data type's freshness requirement
    pub degraded: bool,
    pub source_ids: Vec<String>,
}

/// Freshness of one cached entry at status time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheFreshness {
    pub value: ReadingValue,
    pub freshness_tier: FreshnessTier,
    pub age_secs: f64,
    pub acceptable: bool,
    pub confidence_score: f64,
}

/// System-wide status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub monitor_running: bool,
    pub monitor: Option<MonitorStats>,
    pub data_types: Vec<String>,
    pub cache_size: usize,
    pub subscriber_count: usize,
    pub source_health: BTreeMap<String, SourceHealth>,
    pub cache_freshness: BTreeMap<String, CacheFreshness>,
    pub ledger: LedgerSummary,
    pub timestamp: DateTime<Utc>,
}

pub struct FreshnessService {
    coordinator: Arc<RefreshCoordinator>,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl FreshnessService {
    pub fn new(coordinator: RefreshCoordinator) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
            monitor: Mutex::new(None),
        }
    }

    /// Build from a loaded config file and a populated source directory
    pub fn from_config(config: &TomlConfig, sources: SourceDirectory) -> Result<Self> {
        let registry = config.registry()?;
        let event_bus = EventBus::new(config.monitor.event_capacity);
        let coordinator = RefreshCoordinator::new(registry, sources, event_bus)
            .with_ledger_capacity(config.monitor.ledger_capacity);
        Ok(Self::new(coordinator))
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    /// Current value for a data type, refreshing first if the cache is not acceptable
    pub async fn get_value(&self, data_type_id: &str) -> Result<ValueView> {
        let outcome = self.coordinator.refresh(data_type_id, false).await?;
        Ok(self.view(outcome))
    }

    /// Like [`get_value`](Self::get_value), but forces a refresh when the
    /// served value is older than `max_age`
    ///
    /// A degraded first refresh has already exhausted every source, so it is
    /// returned as is.
    pub async fn ensure_fresh(&self, data_type_id: &str, max_age: Duration) -> Result<ValueView> {
        let mut outcome = self.coordinator.refresh(data_type_id, false).await?;
        if !outcome.is_degraded() && outcome.entry.age(time::now()) > max_age {
            info!(
                data_type = data_type_id,
                max_age_secs = max_age.as_secs_f64(),
                "Value older than requested, forcing refresh"
            );
            outcome = self.coordinator.refresh(data_type_id, true).await?;
        }
        Ok(self.view(outcome))
    }

    /// Refresh every registered data type, returning outcomes in registry order
    pub async fn refresh_all(&self, force: bool) -> Vec<(String, Result<RefreshOutcome>)> {
        let ids = self.coordinator.registry().ids();
        let refreshes = ids.iter().map(|id| self.coordinator.refresh(id, force));
        let outcomes = join_all(refreshes).await;
        ids.into_iter().zip(outcomes).collect()
    }

    fn view(&self, outcome: RefreshOutcome) -> ValueView {
        let now = time::now();
        let cache = self.coordinator.cache();
        let degraded = outcome.is_degraded() || !self.acceptable(&outcome.entry, now);
        let entry = outcome.entry;
        ValueView {
            freshness_tier: cache.freshness_of(&entry, now),
            age_secs: entry.age(now).as_secs_f64(),
            data_type_id: entry.data_type_id,
            value: entry.value,
            confidence_score: entry.confidence_score,
            fetched_at: entry.fetched_at,
            degraded,
            source_ids: entry.source_ids,
        }
    }

    fn acceptable(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        self.coordinator
            .registry()
            .get(&entry.data_type_id)
            .map(|config| self.coordinator.cache().is_acceptable_at(entry, config, now))
            .unwrap_or(false)
    }

    /// Register a handler for cache updates of `data_type_id`
    pub fn subscribe(&self, data_type_id: &str, handler: Arc<dyn UpdateHandler>) -> Result<SubscriptionId> {
        if !self.coordinator.registry().contains(data_type_id) {
            return Err(Error::UnknownDataType(data_type_id.to_string()));
        }
        Ok(self.coordinator.hub().subscribe(data_type_id, handler))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.coordinator.hub().unsubscribe(id)
    }

    /// Receiver for all future events
    pub fn events(&self) -> broadcast::Receiver<FreshEvent> {
        self.coordinator.event_bus().subscribe()
    }

    /// Start the background monitor
    pub fn start_monitor(&self, tick: Duration) -> Result<()> {
        let mut monitor = self.monitor.lock().unwrap_or_else(PoisonError::into_inner);
        if monitor.as_ref().is_some_and(MonitorHandle::is_running) {
            return Err(Error::Internal("Monitor already running".to_string()));
        }
        *monitor = Some(MonitorLoop::new(Arc::clone(&self.coordinator), tick).spawn());
        Ok(())
    }

    /// Stop the background monitor; `None` if it was not started
    pub async fn stop_monitor(&self) -> Option<MonitorStats> {
        let handle = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        Some(handle.shutdown().await)
    }

    pub fn monitor_stats(&self) -> Option<MonitorStats> {
        self.monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(MonitorHandle::stats)
    }

    pub async fn status(&self) -> SystemStatus {
        let now = time::now();
        let cache = self.coordinator.cache();
        let monitor = self.monitor_stats();

        let cache_freshness = cache
            .snapshot()
            .into_iter()
            .map(|entry| {
                let freshness = CacheFreshness {
                    freshness_tier: cache.freshness_of(&entry, now),
                    age_secs: entry.age(now).as_secs_f64(),
                    acceptable: self.acceptable(&entry, now),
                    confidence_score: entry.confidence_score,
                    value: entry.value.clone(),
                };
                (entry.data_type_id, freshness)
            })
            .collect();

        SystemStatus {
            monitor_running: monitor.is_some_and(|m| m.running),
            monitor,
            data_types: self.coordinator.registry().ids(),
            cache_size: cache.len(),
            subscriber_count: self.coordinator.hub().subscriber_count(),
            source_health: self.coordinator.health().snapshot(),
            cache_freshness,
            ledger: self.coordinator.ledger().summary().await,
            timestamp: now,
        }
    }
}

impl Drop for FreshnessService {
    fn drop(&mut self) {
        let monitor = self.monitor.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = monitor.take() {
            handle.cancellation_token().cancel();
        }
    }
}
