//! Consistency Validator
//!
//! Reconciles independent readings of one quantity into a single
//! confidence-scored consensus value.
//!
//! # Checks (in order)
//! 1. **Timeliness**: readings older than `max_age` are excluded from consensus
//!    and reported as non-blocking `StaleReading` issues
//! 2. **Evidence**: remaining readings must number at least `min_sources`
//! 3. **Kind**: readings must be all numeric or all text
//! 4. **Agreement**:
//!    - numeric: `consistency = 1 - mean(|v - mean| / mean)`
//!    - text: `consistency = count(plurality) / n` over normalized values
//! 5. **Sanity** (numeric): non-finite or non-positive values, and a
//!    `(max - min) / mean` spread above the limit, fail even when agreement passes
//!
//! # Scoring
//! On success `confidence_score = consistency * 100`, clamped to 0-100.
//!
//! # Example
//! ```rust,ignore
//! let validator = ConsistencyValidator::new();
//! let result = validator.validate(&config, readings);
//! if result.passed {
//!     println!("consensus {:?} at {:.1}%", result.consensus_value, result.confidence_score.unwrap());
//! }
//! ```

use chrono::{DateTime, Utc};
use freshdata_common::types::{IssueKind, ReadingValue, SourceReading, ValidationIssue, ValidationResult};
use freshdata_common::{time, DataTypeConfig};
use std::collections::HashMap;
use tracing::debug;

/// Default ceiling for `(max - min) / mean` across numeric readings
pub const DEFAULT_MAX_SPREAD_RATIO: f64 = 0.5;

/// Cross-source consistency validator
///
/// Pure and synchronous: no I/O, no suspension.
#[derive(Debug, Clone)]
pub struct ConsistencyValidator {
    max_spread_ratio: f64,
}

impl Default for ConsistencyValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Agreement figures for the usable readings
struct Consensus {
    value: ReadingValue,
    consistency: f64,
    range: Option<(f64, f64)>,
}

impl ConsistencyValidator {
    /// Create validator with the default spread limit (50%)
    pub fn new() -> Self {
        Self {
            max_spread_ratio: DEFAULT_MAX_SPREAD_RATIO,
        }
    }

    /// Create validator with a custom spread limit
    pub fn with_spread_limit(max_spread_ratio: f64) -> Self {
        Self { max_spread_ratio }
    }

    pub fn max_spread_ratio(&self) -> f64 {
        self.max_spread_ratio
    }

    /// Validate readings against the current clock
    pub fn validate(&self, config: &DataTypeConfig, readings: Vec<SourceReading>) -> ValidationResult {
        self.validate_at(config, readings, time::now())
    }

    /// Validate readings against an explicit clock
    pub fn validate_at(
        &self,
        config: &DataTypeConfig,
        readings: Vec<SourceReading>,
        now: DateTime<Utc>,
    ) -> ValidationResult {
        let mut issues = Vec::new();

        // Check 1: exclude stale readings before anything else
        let total = readings.len();
        let usable = self.exclude_stale(config, readings, now, &mut issues);
        let excluded_count = total - usable.len();

        let mut result = ValidationResult {
            data_type_id: config.id.clone(),
            evaluated_at: now,
            passed: false,
            confidence_score: None,
            consensus_value: None,
            consistency: None,
            value_range: None,
            issues: Vec::new(),
            source_count: usable.len(),
            excluded_count,
            evidence: Vec::new(),
        };

        // Check 2: minimum evidence
        let required = config.min_sources.max(1);
        if usable.len() < required {
            issues.push(ValidationIssue::new(
                IssueKind::InsufficientEvidence,
                format!(
                    "insufficient sources: {} usable, {} required",
                    usable.len(),
                    required
                ),
            ));
            result.issues = issues;
            result.evidence = usable;
            debug!(data_type = %config.id, "Validation failed: insufficient sources");
            return result;
        }

        // Check 3 + 4 + 5: kind, agreement, sanity
        let consensus = if usable.iter().all(|r| r.value.is_numeric()) {
            self.numeric_consensus(&usable, &mut issues)
        } else if usable.iter().all(|r| !r.value.is_numeric()) {
            Some(Self::text_consensus(&usable))
        } else {
            issues.push(ValidationIssue::new(
                IssueKind::InvalidValue,
                "mixed numeric and text readings cannot be reconciled",
            ));
            None
        };

        if let Some(consensus) = consensus {
            if consensus.consistency < config.consistency_threshold {
                issues.push(ValidationIssue::new(
                    IssueKind::ConsistencyViolation,
                    format!(
                        "consistency {:.2}% below required {:.2}%",
                        consensus.consistency * 100.0,
                        config.consistency_threshold * 100.0
                    ),
                ));
            }

            result.consistency = Some(consensus.consistency);
            result.value_range = consensus.range;

            if !issues.iter().any(|i| i.kind.is_blocking()) {
                result.passed = true;
                result.confidence_score = Some((consensus.consistency * 100.0).clamp(0.0, 100.0));
                result.consensus_value = Some(consensus.value);
            }
        }

        debug!(
            data_type = %config.id,
            passed = result.passed,
            sources = result.source_count,
            excluded = excluded_count,
            consistency = ?result.consistency,
            issues = issues.len(),
            "Consistency validation complete"
        );

        result.issues = issues;
        result.evidence = usable;
        result
    }

    /// Drop readings older than `max_age`, recording one issue per reading
    fn exclude_stale(
        &self,
        config: &DataTypeConfig,
        readings: Vec<SourceReading>,
        now: DateTime<Utc>,
        issues: &mut Vec<ValidationIssue>,
    ) -> Vec<SourceReading> {
        let mut usable = Vec::with_capacity(readings.len());
        for reading in readings {
            let age = time::age_between(reading.observed_at, now);
            if age > config.max_age {
                issues.push(ValidationIssue::new(
                    IssueKind::StaleReading,
                    format!(
                        "reading from {} is stale: {:.1}s old, max {}s",
                        reading.source_id,
                        age.as_secs_f64(),
                        config.max_age.as_secs()
                    ),
                ));
            } else {
                usable.push(reading);
            }
        }
        usable
    }

    fn numeric_consensus(
        &self,
        readings: &[SourceReading],
        issues: &mut Vec<ValidationIssue>,
    ) -> Option<Consensus> {
        let mut values = Vec::with_capacity(readings.len());
        for reading in readings {
            let value = reading.value.as_f64().unwrap_or(f64::NAN);
            if !value.is_finite() {
                issues.push(ValidationIssue::new(
                    IssueKind::InvalidValue,
                    format!("non-finite value from {}", reading.source_id),
                ));
            } else if value <= 0.0 {
                issues.push(ValidationIssue::new(
                    IssueKind::InvalidValue,
                    format!("non-positive value {} from {}", value, reading.source_id),
                ));
            }
            values.push(value);
        }

        // Relative deviation is undefined without a positive, finite mean
        if values.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return None;
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let avg_deviation = values.iter().map(|v| (v - mean).abs() / mean).sum::<f64>() / n;
        let consistency = 1.0 - avg_deviation;

        // Finite inputs can still overflow the sum
        if !mean.is_finite() || !consistency.is_finite() {
            issues.push(ValidationIssue::new(
                IssueKind::InvalidValue,
                "readings too large to average",
            ));
            return None;
        }

        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let spread = (max - min) / mean;
        if spread > self.max_spread_ratio {
            issues.push(ValidationIssue::new(
                IssueKind::InvalidValue,
                format!(
                    "value spread {:.1}% exceeds limit {:.1}%",
                    spread * 100.0,
                    self.max_spread_ratio * 100.0
                ),
            ));
        }

        Some(Consensus {
            value: ReadingValue::Numeric(mean),
            consistency,
            range: Some((min, max)),
        })
    }

    /// Plurality over trimmed, lowercased text; ties go to the first value seen
    fn text_consensus(readings: &[SourceReading]) -> Consensus {
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        for reading in readings {
            let normalized = reading.value.to_string().trim().to_lowercase();
            let count = counts.entry(normalized.clone()).or_insert(0);
            if *count == 0 {
                order.push(normalized);
            }
            *count += 1;
        }

        let mut best = String::new();
        let mut best_count = 0;
        for value in order {
            let count = counts[&value];
            if count > best_count {
                best_count = count;
                best = value;
            }
        }

        Consensus {
            value: ReadingValue::Text(best),
            consistency: best_count as f64 / readings.len() as f64,
            range: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use freshdata_common::time::ago_from;
    use freshdata_common::FreshnessTier;
    use std::time::Duration;

    fn config(min_sources: usize, threshold: f64) -> DataTypeConfig {
        DataTypeConfig::new(
            "financial_market",
            Duration::from_secs(30),
            Duration::from_secs(300),
            FreshnessTier::NearRealtime,
        )
        .with_consensus(min_sources, threshold)
    }

    fn numeric(values: &[f64], now: DateTime<Utc>) -> Vec<SourceReading> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| SourceReading::new(format!("source-{}", i + 1), *v, now))
            .collect()
    }

    #[test]
    fn test_identical_readings_full_confidence() {
        let now = time::now();
        let result = ConsistencyValidator::new().validate_at(
            &config(2, 0.95),
            numeric(&[100.0, 100.0, 100.0], now),
            now,
        );
        assert!(result.passed);
        assert_eq!(result.confidence_score, Some(100.0));
        assert_eq!(result.consensus_value, Some(ReadingValue::Numeric(100.0)));
        assert_eq!(result.source_count, 3);
        assert_eq!(result.value_range, Some((100.0, 100.0)));
        assert!(result.issues.is_empty());
    }

    #[test]
    fn test_disagreeing_readings_fail_threshold() {
        let now = time::now();
        let result = ConsistencyValidator::new().validate_at(
            &config(2, 0.95),
            numeric(&[100.0, 200.0], now),
            now,
        );
        assert!(!result.passed);
        assert!(result.confidence_score.is_none());
        assert!(result.consensus_value.is_none());

        let consistency = result.consistency.unwrap();
        assert!((consistency - (1.0 - 1.0 / 3.0)).abs() < 1e-9);
        assert!(result.has_issue(IssueKind::ConsistencyViolation));
        let message = result
            .issues
            .iter()
            .find(|i| i.kind == IssueKind::ConsistencyViolation)
            .unwrap()
            .message
            .clone();
        assert!(message.contains("66.67%"), "{}", message);
        assert!(message.contains("95.00%"), "{}", message);
    }

    #[test]
    fn test_single_reading_insufficient_regardless_of_value() {
        let now = time::now();
        for value in [27450.0, -1.0, 0.0] {
            let result = ConsistencyValidator::new().validate_at(
                &config(2, 0.95),
                numeric(&[value], now),
                now,
            );
            assert!(!result.passed);
            assert_eq!(result.issues.len(), 1);
            assert_eq!(result.issues[0].kind, IssueKind::InsufficientEvidence);
            assert!(result.issues[0].message.starts_with("insufficient sources"));
        }
    }

    #[test]
    fn test_close_prices_pass_with_high_confidence() {
        let now = time::now();
        let result = ConsistencyValidator::new().validate_at(
            &config(2, 0.95),
            numeric(&[27450.25, 27452.80, 27448.90], now),
            now,
        );
        assert!(result.passed);
        let score = result.confidence_score.unwrap();
        assert!(score > 99.9 && score <= 100.0);
        let mean = result.consensus_value.unwrap().as_f64().unwrap();
        assert!((mean - 27450.65).abs() < 0.01);
    }

    #[test]
    fn test_non_positive_value_is_invalid() {
        let now = time::now();
        let result = ConsistencyValidator::new().validate_at(
            &config(2, 0.0),
            numeric(&[100.0, 0.0], now),
            now,
        );
        assert!(!result.passed);
        assert!(result.has_issue(IssueKind::InvalidValue));
    }

    #[test]
    fn test_spread_flagged_even_when_consistency_passes() {
        let now = time::now();
        // Nine agreeing readings and one outlier: average deviation stays small
        // but the range-to-mean ratio exceeds 50%
        let mut values = vec![100.0; 9];
        values.push(170.0);
        let result = ConsistencyValidator::new().validate_at(&config(2, 0.80), numeric(&values, now), now);
        assert!(result.consistency.unwrap() >= 0.80);
        assert!(!result.passed);
        assert!(result.has_issue(IssueKind::InvalidValue));
        assert!(!result.has_issue(IssueKind::ConsistencyViolation));
    }

    #[test]
    fn test_stale_readings_excluded_before_count() {
        let now = time::now();
        let old = ago_from(now, Duration::from_secs(600));
        let readings = vec![
            SourceReading::new("yahoo", 100.0, now),
            SourceReading::new("investing", 100.0, old),
        ];
        let result = ConsistencyValidator::new().validate_at(&config(2, 0.95), readings, now);
        assert!(!result.passed);
        assert_eq!(result.source_count, 1);
        assert_eq!(result.excluded_count, 1);
        assert!(result.has_issue(IssueKind::StaleReading));
        assert!(result.has_issue(IssueKind::InsufficientEvidence));
    }

    #[test]
    fn test_stale_reading_alone_does_not_fail() {
        let now = time::now();
        let old = ago_from(now, Duration::from_secs(600));
        let readings = vec![
            SourceReading::new("yahoo", 100.0, now),
            SourceReading::new("investing", 100.0, now),
            SourceReading::new("bloomberg", 500.0, old),
        ];
        let result = ConsistencyValidator::new().validate_at(&config(2, 0.95), readings, now);
        assert!(result.passed);
        assert_eq!(result.consensus_value, Some(ReadingValue::Numeric(100.0)));
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].kind, IssueKind::StaleReading);
        assert_eq!(result.evidence.len(), 2);
    }

    #[test]
    fn test_text_plurality_consensus() {
        let now = time::now();
        let readings = vec![
            SourceReading::new("wikipedia", "Artificial Intelligence", now),
            SourceReading::new("encyclopedia", "artificial intelligence ", now),
            SourceReading::new("academic", "Artificial intelligence", now),
            SourceReading::new("blog", "AI", now),
        ];
        let result = ConsistencyValidator::new().validate_at(&config(2, 0.70), readings, now);
        assert!(result.passed);
        assert_eq!(
            result.consensus_value,
            Some(ReadingValue::Text("artificial intelligence".into()))
        );
        assert_eq!(result.confidence_score, Some(75.0));
        assert!(result.value_range.is_none());
    }

    #[test]
    fn test_text_disagreement_fails() {
        let now = time::now();
        let readings = vec![
            SourceReading::new("wikipedia", "人工智能", now),
            SourceReading::new("encyclopedia", "Artificial Intelligence", now),
            SourceReading::new("academic", "AI", now),
        ];
        let result = ConsistencyValidator::new().validate_at(&config(2, 0.90), readings, now);
        assert!(!result.passed);
        assert!(result.has_issue(IssueKind::ConsistencyViolation));
    }

    #[test]
    fn test_mixed_kinds_are_invalid() {
        let now = time::now();
        let readings = vec![
            SourceReading::new("a", 100.0, now),
            SourceReading::new("b", "100", now),
        ];
        let result = ConsistencyValidator::new().validate_at(&config(2, 0.5), readings, now);
        assert!(!result.passed);
        assert!(result.has_issue(IssueKind::InvalidValue));
        assert!(result.consistency.is_none());
    }

    #[test]
    fn test_overflowing_mean_is_invalid() {
        let readings = vec![
            SourceReading::new("a", 1e308, time::now()),
            SourceReading::new("b", 1e308, time::now()),
        ];
        let result = ConsistencyValidator::new().validate(&config(2, 0.95), readings);

        assert!(!result.passed);
        assert!(result.confidence_score.is_none());
        assert!(result.consensus_value.is_none());
        assert!(result.has_issue(IssueKind::InvalidValue));
    }

    #[test]
    fn test_confidence_decreases_with_deviation() {
        let now = time::now();
        let validator = ConsistencyValidator::new();
        let cfg = config(2, 0.0);
        let mut previous = 101.0;
        for offset in [0.0, 1.0, 5.0, 10.0, 20.0] {
            let result = validator.validate_at(&cfg, numeric(&[100.0, 100.0 + offset], now), now);
            let score = result.confidence_score.unwrap();
            assert!(score < previous, "offset {} gave {}", offset, score);
            previous = score;
        }
    }
}
