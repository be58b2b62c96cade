//! Core records exchanged between fetchers, the validator and the cache
//!
//! Readings and results are fixed-shape records; collaborators never pass
//! loosely keyed maps around.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Readings
// ============================================================================

/// Value reported by a source: a number (prices, indices) or text (headlines, labels)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReadingValue {
    Numeric(f64),
    Text(String),
}

impl ReadingValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ReadingValue::Numeric(v) => Some(*v),
            ReadingValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ReadingValue::Numeric(_) => None,
            ReadingValue::Text(s) => Some(s),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ReadingValue::Numeric(_))
    }
}

impl fmt::Display for ReadingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingValue::Numeric(v) => write!(f, "{}", v),
            ReadingValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for ReadingValue {
    fn from(v: f64) -> Self {
        ReadingValue::Numeric(v)
    }
}

impl From<&str> for ReadingValue {
    fn from(s: &str) -> Self {
        ReadingValue::Text(s.to_string())
    }
}

impl From<String> for ReadingValue {
    fn from(s: String) -> Self {
        ReadingValue::Text(s)
    }
}

/// A single timestamped value reported by one named source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReading {
    /// Provider that reported the value (e.g. "yahoo", "coinbase")
    pub source_id: String,
    pub value: ReadingValue,
    /// When the provider observed the value (not when it was fetched)
    pub observed_at: DateTime<Utc>,
}

impl SourceReading {
    pub fn new(
        source_id: impl Into<String>,
        value: impl Into<ReadingValue>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            value: value.into(),
            observed_at,
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Category of a validation issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Reading older than the data type's max age (excluded from consensus)
    StaleReading,
    /// Fewer usable readings than `min_sources`
    InsufficientEvidence,
    /// Agreement below `consistency_threshold`
    ConsistencyViolation,
    /// Sanity check failure (non-positive price, excessive spread, mixed kinds)
    InvalidValue,
}

impl IssueKind {
    /// Blocking issues force `passed = false`
    pub fn is_blocking(self) -> bool {
        !matches!(self, IssueKind::StaleReading)
    }
}

/// One entry in a result's ordered issue list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Outcome of reconciling a set of readings for one data type
///
/// Immutable once created. `confidence_score` and `consensus_value` are only
/// populated when `passed` is true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub data_type_id: String,
    pub evaluated_at: DateTime<Utc>,
    pub passed: bool,
    /// Agreement score (0-100)
    pub confidence_score: Option<f64>,
    pub consensus_value: Option<ReadingValue>,
    /// Measured agreement (0.0-1.0), present whenever it could be computed
    pub consistency: Option<f64>,
    /// Lowest and highest numeric reading
    pub value_range: Option<(f64, f64)>,
    pub issues: Vec<ValidationIssue>,
    /// Usable readings after stale exclusion
    pub source_count: usize,
    /// Readings dropped for exceeding max age
    pub excluded_count: usize,
    /// Readings the consensus was computed from
    pub evidence: Vec<SourceReading>,
}

impl ValidationResult {
    /// Issue messages in order
    pub fn issue_messages(&self) -> Vec<String> {
        self.issues.iter().map(|i| i.message.clone()).collect()
    }

    pub fn has_issue(&self, kind: IssueKind) -> bool {
        self.issues.iter().any(|i| i.kind == kind)
    }

    /// Distinct source ids of the evidence, in reading order
    pub fn source_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::with_capacity(self.evidence.len());
        for reading in &self.evidence {
            if !ids.contains(&reading.source_id) {
                ids.push(reading.source_id.clone());
            }
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_value_accessors() {
        let n = ReadingValue::from(27450.25);
        assert_eq!(n.as_f64(), Some(27450.25));
        assert!(n.as_text().is_none());
        assert!(n.is_numeric());

        let t = ReadingValue::from("Artificial Intelligence");
        assert_eq!(t.as_text(), Some("Artificial Intelligence"));
        assert!(t.as_f64().is_none());
    }

    #[test]
    fn test_reading_value_serializes_untagged() {
        let json = serde_json::to_string(&ReadingValue::Numeric(1.5)).unwrap();
        assert_eq!(json, "1.5");
        let json = serde_json::to_string(&ReadingValue::Text("ai".into())).unwrap();
        assert_eq!(json, "\"ai\"");

        let back: ReadingValue = serde_json::from_str("42.0").unwrap();
        assert_eq!(back, ReadingValue::Numeric(42.0));
    }

    #[test]
    fn test_stale_reading_is_not_blocking() {
        assert!(!IssueKind::StaleReading.is_blocking());
        assert!(IssueKind::InsufficientEvidence.is_blocking());
        assert!(IssueKind::ConsistencyViolation.is_blocking());
        assert!(IssueKind::InvalidValue.is_blocking());
    }

    #[test]
    fn test_source_ids_are_distinct_and_ordered() {
        let now = Utc::now();
        let result = ValidationResult {
            data_type_id: "stock_prices".into(),
            evaluated_at: now,
            passed: true,
            confidence_score: Some(100.0),
            consensus_value: Some(ReadingValue::Numeric(10.0)),
            consistency: Some(1.0),
            value_range: Some((10.0, 10.0)),
            issues: Vec::new(),
            source_count: 3,
            excluded_count: 0,
            evidence: vec![
                SourceReading::new("yahoo", 10.0, now),
                SourceReading::new("investing", 10.0, now),
                SourceReading::new("yahoo", 10.0, now),
            ],
        };
        assert_eq!(result.source_ids(), vec!["yahoo".to_string(), "investing".to_string()]);
    }
}
