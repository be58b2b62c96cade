//! Bounded, append-only record of validation results
//!
//! Order is completion order. Once capacity is reached the oldest entry is
//! evicted for every new one.

use freshdata_common::ValidationResult;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::RwLock;

/// One recorded validation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    /// Starts at 1, strictly increasing, never reused
    pub sequence_id: u64,
    pub result: ValidationResult,
}

/// Per data type counts
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataTypeStats {
    pub total: usize,
    pub passed: usize,
    /// Percent (0-100)
    pub pass_rate: f64,
}

/// Aggregation over retained entries
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Percent (0-100); 0 when empty
    pub failure_rate: f64,
    pub by_data_type: BTreeMap<String, DataTypeStats>,
    pub latest: Option<LedgerEntry>,
}

struct LedgerInner {
    entries: VecDeque<LedgerEntry>,
    next_sequence: u64,
}

/// Validation ledger
pub struct ValidationLedger {
    inner: RwLock<LedgerInner>,
    capacity: usize,
}

impl ValidationLedger {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: RwLock::new(LedgerInner {
                entries: VecDeque::with_capacity(capacity.min(1024)),
                next_sequence: 1,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a result, returning its sequence id
    pub async fn record(&self, result: ValidationResult) -> u64 {
        let mut inner = self.inner.write().await;
        let sequence_id = inner.next_sequence;
        inner.next_sequence += 1;
        inner.entries.push_back(LedgerEntry {
            sequence_id,
            result,
        });
        while inner.entries.len() > self.capacity {
            inner.entries.pop_front();
        }
        sequence_id
    }

    /// Retained entries, oldest first
    pub async fn entries(&self) -> Vec<LedgerEntry> {
        self.inner.read().await.entries.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop all retained entries; sequence ids keep counting
    pub async fn clear(&self) {
        self.inner.write().await.entries.clear();
    }

    pub async fn summary(&self) -> LedgerSummary {
        let inner = self.inner.read().await;
        let total = inner.entries.len();
        let passed = inner.entries.iter().filter(|e| e.result.passed).count();

        let mut by_data_type: BTreeMap<String, DataTypeStats> = BTreeMap::new();
        for entry in &inner.entries {
            let stats = by_data_type
                .entry(entry.result.data_type_id.clone())
                .or_default();
            stats.total += 1;
            if entry.result.passed {
                stats.passed += 1;
            }
        }
        for stats in by_data_type.values_mut() {
            stats.pass_rate = percent(stats.passed, stats.total);
        }

        LedgerSummary {
            total,
            passed,
            failed: total - passed,
            failure_rate: percent(total - passed, total),
            by_data_type,
            latest: inner.entries.back().cloned(),
        }
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use freshdata_common::time;

    fn result(id: &str, passed: bool) -> ValidationResult {
        ValidationResult {
            data_type_id: id.to_string(),
            evaluated_at: time::now(),
            passed,
            confidence_score: passed.then_some(99.0),
            consensus_value: None,
            consistency: None,
            value_range: None,
            issues: Vec::new(),
            source_count: 2,
            excluded_count: 0,
            evidence: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_failure_rate_thirty_percent() {
        let ledger = ValidationLedger::new(100);
        for i in 0..10 {
            ledger.record(result("financial_market", i >= 3)).await;
        }
        let summary = ledger.summary().await;
        assert_eq!(summary.total, 10);
        assert_eq!(summary.passed, 7);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.failure_rate, 30.0);
    }

    #[tokio::test]
    async fn test_empty_summary() {
        let summary = ValidationLedger::new(10).summary().await;
        assert_eq!(summary.total, 0);
        assert_eq!(summary.failure_rate, 0.0);
        assert!(summary.latest.is_none());
    }

    #[tokio::test]
    async fn test_evicts_oldest_beyond_capacity() {
        let ledger = ValidationLedger::new(3);
        for _ in 0..5 {
            ledger.record(result("news", true)).await;
        }
        let entries = ledger.entries().await;
        let ids: Vec<u64> = entries.iter().map(|e| e.sequence_id).collect();
        assert_eq!(ids, vec![3, 4, 5]);
        assert_eq!(ledger.summary().await.total, 3);
    }

    #[tokio::test]
    async fn test_by_data_type_breakdown() {
        let ledger = ValidationLedger::new(10);
        ledger.record(result("crypto_prices", true)).await;
        ledger.record(result("crypto_prices", false)).await;
        ledger.record(result("news", true)).await;

        let summary = ledger.summary().await;
        let crypto = &summary.by_data_type["crypto_prices"];
        assert_eq!(crypto.total, 2);
        assert_eq!(crypto.passed, 1);
        assert_eq!(crypto.pass_rate, 50.0);
        assert_eq!(summary.by_data_type["news"].pass_rate, 100.0);
        assert_eq!(summary.latest.unwrap().result.data_type_id, "news");
    }

    #[tokio::test]
    async fn test_clear_keeps_sequence_counting() {
        let ledger = ValidationLedger::new(10);
        ledger.record(result("news", true)).await;
        ledger.clear().await;
        assert!(ledger.is_empty().await);
        assert_eq!(ledger.record(result("news", true)).await, 2);
    }
}
