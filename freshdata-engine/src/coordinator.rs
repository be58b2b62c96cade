//! Refresh coordinator
//!
//! Owns the refresh path for every data type:
//! cache check → fetch with retry (sources in priority order) → validation →
//! ledger → cache update → subscriber fan-out.
//!
//! At most one refresh per data type is in flight. Each refresh runs as its own
//! task; concurrent callers for the same id await the same shared handle and
//! receive the same outcome. A caller that stops waiting does not cancel the
//! refresh, which runs to completion within its retry and timeout budget.
//! Refreshes of different ids proceed in parallel.
//!
//! When no fresh value can be produced the previous entry is served with
//! `RefreshStatus::Degraded`. Only when nothing is cached does the caller see
//! `Error::DataUnavailable`.

use crate::cache::{CacheEntry, CacheStore};
use crate::error::{Error, Result};
use crate::fetch::SourceDirectory;
use crate::health::SourceHealthTracker;
use crate::hub::SubscriberHub;
use crate::ledger::ValidationLedger;
use crate::retry::{fetch_with_retry, RetryPolicy};
use crate::validator::ConsistencyValidator;
use freshdata_common::config::DEFAULT_LEDGER_CAPACITY;
use freshdata_common::events::{EventBus, FreshEvent};
use freshdata_common::{time, DataTypeConfig, DataTypeRegistry, SourceReading};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

/// How a refresh request was satisfied
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RefreshStatus {
    /// Cached entry was acceptable; nothing was fetched
    CacheHit,
    /// A new validated value was cached
    Refreshed,
    /// Refresh failed; the previous entry is served
    Degraded { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshOutcome {
    pub entry: CacheEntry,
    pub status: RefreshStatus,
}

impl RefreshOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self.status, RefreshStatus::Degraded { .. })
    }
}

type SharedRefresh = Shared<BoxFuture<'static, Result<RefreshOutcome>>>;

pub struct RefreshCoordinator {
    registry: Arc<DataTypeRegistry>,
    sources: SourceDirectory,
    cache: Arc<CacheStore>,
    validator: ConsistencyValidator,
    ledger: Arc<ValidationLedger>,
    hub: Arc<SubscriberHub>,
    health: Arc<SourceHealthTracker>,
    event_bus: EventBus,
    in_flight: Mutex<HashMap<String, SharedRefresh>>,
}

impl RefreshCoordinator {
    /// Create a coordinator with an empty cache and default ledger capacity
    pub fn new(registry: DataTypeRegistry, sources: SourceDirectory, event_bus: EventBus) -> Self {
        let cache = Arc::new(CacheStore::new(registry.breakpoints().clone()));
        Self {
            registry: Arc::new(registry),
            sources,
            cache,
            validator: ConsistencyValidator::new(),
            ledger: Arc::new(ValidationLedger::new(DEFAULT_LEDGER_CAPACITY)),
            hub: Arc::new(SubscriberHub::new()),
            health: Arc::new(SourceHealthTracker::new(event_bus.clone())),
            event_bus,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_ledger_capacity(mut self, capacity: usize) -> Self {
        self.ledger = Arc::new(ValidationLedger::new(capacity));
        self
    }

    pub fn with_validator(mut self, validator: ConsistencyValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn registry(&self) -> &Arc<DataTypeRegistry> {
        &self.registry
    }

    pub fn sources(&self) -> &SourceDirectory {
        &self.sources
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn ledger(&self) -> &Arc<ValidationLedger> {
        &self.ledger
    }

    pub fn hub(&self) -> &Arc<SubscriberHub> {
        &self.hub
    }

    pub fn health(&self) -> &Arc<SourceHealthTracker> {
        &self.health
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Number of refreshes currently running
    pub fn in_flight_count(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn config(&self, data_type_id: &str) -> Result<&DataTypeConfig> {
        self.registry
            .get(data_type_id)
            .ok_or_else(|| Error::UnknownDataType(data_type_id.to_string()))
    }

    /// Return an acceptable value for `data_type_id`, refreshing if needed
    ///
    /// `force` skips the cache check. A caller arriving while a refresh for
    /// the same id is running joins it instead of starting another.
    pub async fn refresh(self: &Arc<Self>, data_type_id: &str, force: bool) -> Result<RefreshOutcome> {
        let config = self.config(data_type_id)?;

        if !force {
            if let Some(entry) = self.cache.get(data_type_id) {
                if self.cache.is_acceptable(&entry, config) {
                    debug!(data_type = data_type_id, "Cache hit");
                    return Ok(RefreshOutcome {
                        entry,
                        status: RefreshStatus::CacheHit,
                    });
                }
            }
        }

        let shared = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match in_flight.get(data_type_id) {
                Some(existing) => {
                    debug!(data_type = data_type_id, "Joining in-flight refresh");
                    existing.clone()
                }
                None => {
                    let this = Arc::clone(self);
                    let id = data_type_id.to_string();
                    // The refresh owns its task: dropping every waiter does not
                    // stop it between the cache write and the notifications
                    let task = tokio::spawn(async move {
                        let result = AssertUnwindSafe(this.run_refresh(&id))
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|_| {
                                Err(Error::Internal(format!("Refresh of {} panicked", id)))
                            });
                        this.in_flight
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .remove(&id);
                        result
                    });
                    let refresh = async move {
                        task.await
                            .unwrap_or_else(|e| Err(Error::Internal(format!("Refresh task failed: {}", e))))
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(data_type_id.to_string(), refresh.clone());
                    refresh
                }
            }
        };

        shared.await
    }

    async fn run_refresh(&self, data_type_id: &str) -> Result<RefreshOutcome> {
        let config = self.config(data_type_id)?;
        let start_time = Instant::now();
        debug!(data_type = data_type_id, "Refresh started");

        let (readings, attempts) = match self.fetch_readings(config).await {
            Ok(fetched) => fetched,
            Err(err) => return self.degrade(data_type_id, err.to_string()),
        };

        let result = self.validator.validate(config, readings);
        let sequence_id = self.ledger.record(result.clone()).await;
        self.event_bus.emit_lossy(FreshEvent::ValidationCompleted {
            data_type_id: data_type_id.to_string(),
            sequence_id,
            passed: result.passed,
            confidence_score: result.confidence_score,
            issue_count: result.issues.len(),
            timestamp: result.evaluated_at,
        });

        let value = match (result.passed, result.consensus_value.clone()) {
            (true, Some(value)) => value,
            _ => {
                let blocking: Vec<&str> = result
                    .issues
                    .iter()
                    .filter(|i| i.kind.is_blocking())
                    .map(|i| i.message.as_str())
                    .collect();
                let reason = format!("validation failed: {}", blocking.join("; "));
                return self.degrade(data_type_id, reason);
            }
        };

        let entry = CacheEntry {
            data_type_id: data_type_id.to_string(),
            value,
            fetched_at: time::now(),
            source_ids: result.source_ids(),
            attempt_count: attempts,
            confidence_score: result.confidence_score.unwrap_or(0.0),
        };
        self.cache.put(entry.clone());

        let report = self.hub.notify(data_type_id, &entry).await;
        self.event_bus.emit_lossy(FreshEvent::CacheUpdated {
            data_type_id: data_type_id.to_string(),
            value: entry.value.clone(),
            confidence_score: entry.confidence_score,
            source_ids: entry.source_ids.clone(),
            timestamp: entry.fetched_at,
        });

        info!(
            data_type = data_type_id,
            value = %entry.value,
            confidence = entry.confidence_score,
            attempts,
            notified = report.delivered,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Refreshed"
        );

        Ok(RefreshOutcome {
            entry,
            status: RefreshStatus::Refreshed,
        })
    }

    /// Try each source in priority order; the first one returning readings wins
    ///
    /// Returns the readings and the total attempts spent across sources.
    async fn fetch_readings(&self, config: &DataTypeConfig) -> Result<(Vec<SourceReading>, u32)> {
        let sources = self.sources.sources_for(&config.id);
        if sources.is_empty() {
            return Err(Error::SourceExhausted {
                data_type_id: config.id.clone(),
                attempts: 0,
                last_error: "no sources registered".to_string(),
            });
        }

        let policy = RetryPolicy::from_config(config);
        let mut total_attempts = 0;
        let mut last_error = String::new();

        for source in sources {
            let outcome = fetch_with_retry(&source.name, &policy, move || {
                source.fetcher.fetch(&config.id, &source.params)
            })
            .await;

            match outcome {
                Ok(success) => {
                    total_attempts += success.attempts;
                    self.health.record_success(&source.name, success.elapsed);
                    return Ok((success.readings, total_attempts));
                }
                Err(exhausted) => {
                    total_attempts += exhausted.attempts;
                    last_error = exhausted.last_error.to_string();
                    self.health.record_failure(&source.name, &last_error);
                    warn!(
                        data_type = %config.id,
                        source = %source.name,
                        attempts = exhausted.attempts,
                        "Source exhausted"
                    );
                }
            }
        }

        Err(Error::SourceExhausted {
            data_type_id: config.id.clone(),
            attempts: total_attempts,
            last_error,
        })
    }

    /// Serve the previous entry flagged degraded, or fail when there is none
    fn degrade(&self, data_type_id: &str, reason: String) -> Result<RefreshOutcome> {
        let Some(entry) = self.cache.get(data_type_id) else {
            warn!(data_type = data_type_id, "No cached value to fall back on: {}", reason);
            return Err(Error::DataUnavailable {
                data_type_id: data_type_id.to_string(),
                reason,
            });
        };

        let now = time::now();
        let served_tier = self.cache.freshness_of(&entry, now);
        warn!(
            data_type = data_type_id,
            tier = %served_tier,
            age_secs = entry.age(now).as_secs(),
            "Serving cached value degraded: {}",
            reason
        );
        self.event_bus.emit_lossy(FreshEvent::RefreshDegraded {
            data_type_id: data_type_id.to_string(),
            reason: reason.clone(),
            served_tier,
            timestamp: now,
        });

        Ok(RefreshOutcome {
            entry,
            status: RefreshStatus::Degraded { reason },
        })
    }
}
