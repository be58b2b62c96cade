//! Latest accepted value per data type
//!
//! Entries are stored behind a `std::sync::RwLock` that is never held across
//! an `.await`: reads and writes complete without yielding, and `put` swaps
//! the whole entry so readers see either the old or the new value.
//!
//! Freshness is never stored on the entry. It is recomputed from `fetched_at`
//! every time it is asked for, so an idle period cannot leave a stale entry
//! labelled fresh.

use chrono::{DateTime, Utc};
use freshdata_common::freshness::{FreshnessBreakpoints, FreshnessTier};
use freshdata_common::{time, DataTypeConfig, ReadingValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// Cached, validated value for one data type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data_type_id: String,
    pub value: ReadingValue,
    pub fetched_at: DateTime<Utc>,
    /// Providers whose readings backed the value
    pub source_ids: Vec<String>,
    /// Fetch attempts spent producing the value
    pub attempt_count: u32,
    /// Agreement score (0-100) of the validation that produced the value
    pub confidence_score: f64,
}

impl CacheEntry {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        time::age_between(self.fetched_at, now)
    }

    pub fn freshness_tier(&self, breakpoints: &FreshnessBreakpoints, now: DateTime<Utc>) -> FreshnessTier {
        breakpoints.classify(self.age(now))
    }
}

/// Keyed store holding at most one entry per data type
#[derive(Debug)]
pub struct CacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
    breakpoints: FreshnessBreakpoints,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(FreshnessBreakpoints::default())
    }
}

impl CacheStore {
    pub fn new(breakpoints: FreshnessBreakpoints) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            breakpoints,
        }
    }

    pub fn breakpoints(&self) -> &FreshnessBreakpoints {
        &self.breakpoints
    }

    /// Current entry for a data type, if any
    pub fn get(&self, data_type_id: &str) -> Option<CacheEntry> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(data_type_id).cloned()
    }

    /// Replace the entry for `entry.data_type_id`
    pub fn put(&self, entry: CacheEntry) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(entry.data_type_id.clone(), entry);
    }

    pub fn remove(&self, data_type_id: &str) -> Option<CacheEntry> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(data_type_id)
    }

    /// All entries, sorted by data type id
    pub fn snapshot(&self) -> Vec<CacheEntry> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<CacheEntry> = entries.values().cloned().collect();
        all.sort_by(|a, b| a.data_type_id.cmp(&b.data_type_id));
        all
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tier of an entry as of `now`
    pub fn freshness_of(&self, entry: &CacheEntry, now: DateTime<Utc>) -> FreshnessTier {
        entry.freshness_tier(&self.breakpoints, now)
    }

    /// True iff the entry may be served without refreshing
    pub fn is_acceptable(&self, entry: &CacheEntry, config: &DataTypeConfig) -> bool {
        self.is_acceptable_at(entry, config, time::now())
    }

    /// `is_acceptable` against an explicit clock
    ///
    /// Requires both the tier (at least `required_tier`) and the age (at most
    /// `max_age`).
    pub fn is_acceptable_at(
        &self,
        entry: &CacheEntry,
        config: &DataTypeConfig,
        now: DateTime<Utc>,
    ) -> bool {
        let age = entry.age(now);
        self.breakpoints.classify(age).satisfies(config.required_tier) && age <= config.max_age
    }
}
