//! Freshness tiers and the age classifier
//!
//! Every cached value is classified into one of four tiers from its age alone.
//! Tiers are totally ordered by recency:
//!
//! `Realtime > NearRealtime > Recent > Stale`
//!
//! # Boundaries
//! A tier is reached only when the age is strictly below its breakpoint, so an
//! age exactly on a breakpoint falls into the staler tier. With the default
//! breakpoints 59.999s is `Realtime` and 60.0s is `NearRealtime`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default upper bound (exclusive) of the `Realtime` tier
pub const DEFAULT_REALTIME_SECS: u64 = 60;
/// Default upper bound (exclusive) of the `NearRealtime` tier
pub const DEFAULT_NEAR_REALTIME_SECS: u64 = 300;
/// Default upper bound (exclusive) of the `Recent` tier
pub const DEFAULT_RECENT_SECS: u64 = 900;

/// Discrete recency classification of a value
///
/// Variant order matters: the derived `Ord` makes `Stale` the least fresh and
/// `Realtime` the most fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessTier {
    Stale,
    Recent,
    NearRealtime,
    Realtime,
}

impl FreshnessTier {
    /// True if this tier is at least as fresh as `required`
    pub fn satisfies(self, required: FreshnessTier) -> bool {
        self >= required
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FreshnessTier::Realtime => "realtime",
            FreshnessTier::NearRealtime => "near_realtime",
            FreshnessTier::Recent => "recent",
            FreshnessTier::Stale => "stale",
        }
    }
}

impl fmt::Display for FreshnessTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FreshnessTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "realtime" => Ok(FreshnessTier::Realtime),
            "near_realtime" => Ok(FreshnessTier::NearRealtime),
            "recent" => Ok(FreshnessTier::Recent),
            "stale" => Ok(FreshnessTier::Stale),
            other => Err(Error::InvalidInput(format!("Unknown freshness tier: {}", other))),
        }
    }
}

/// Age breakpoints separating the tiers
///
/// Breakpoints are data-type agnostic; individual data types only choose the
/// minimum tier they accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessBreakpoints {
    pub realtime: Duration,
    pub near_realtime: Duration,
    pub recent: Duration,
}

impl Default for FreshnessBreakpoints {
    fn default() -> Self {
        Self {
            realtime: Duration::from_secs(DEFAULT_REALTIME_SECS),
            near_realtime: Duration::from_secs(DEFAULT_NEAR_REALTIME_SECS),
            recent: Duration::from_secs(DEFAULT_RECENT_SECS),
        }
    }
}

impl FreshnessBreakpoints {
    /// Build breakpoints, rejecting any ordering that would break monotonicity
    pub fn new(realtime: Duration, near_realtime: Duration, recent: Duration) -> Result<Self> {
        if realtime.is_zero() || realtime >= near_realtime || near_realtime >= recent {
            return Err(Error::Config(format!(
                "Freshness breakpoints must be strictly increasing and non-zero \
                 (realtime {:?}, near_realtime {:?}, recent {:?})",
                realtime, near_realtime, recent
            )));
        }
        Ok(Self {
            realtime,
            near_realtime,
            recent,
        })
    }

    /// Classify an age into a tier
    pub fn classify(&self, age: Duration) -> FreshnessTier {
        if age < self.realtime {
            FreshnessTier::Realtime
        } else if age < self.near_realtime {
            FreshnessTier::NearRealtime
        } else if age < self.recent {
            FreshnessTier::Recent
        } else {
            FreshnessTier::Stale
        }
    }
}

/// Classify an age using the default breakpoints (60s / 300s / 900s)
pub fn classify(age: Duration) -> FreshnessTier {
    FreshnessBreakpoints::default().classify(age)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_total_order() {
        assert!(FreshnessTier::Realtime > FreshnessTier::NearRealtime);
        assert!(FreshnessTier::NearRealtime > FreshnessTier::Recent);
        assert!(FreshnessTier::Recent > FreshnessTier::Stale);
    }

    #[test]
    fn test_classify_realtime_boundary() {
        assert_eq!(classify(Duration::from_millis(59_999)), FreshnessTier::Realtime);
        assert_eq!(classify(Duration::from_secs(60)), FreshnessTier::NearRealtime);
    }

    #[test]
    fn test_classify_near_realtime_boundary() {
        assert_eq!(classify(Duration::from_millis(299_999)), FreshnessTier::NearRealtime);
        assert_eq!(classify(Duration::from_secs(300)), FreshnessTier::Recent);
    }

    #[test]
    fn test_classify_recent_boundary() {
        assert_eq!(classify(Duration::from_millis(899_999)), FreshnessTier::Recent);
        assert_eq!(classify(Duration::from_secs(900)), FreshnessTier::Stale);
    }

    #[test]
    fn test_classify_zero_and_huge() {
        assert_eq!(classify(Duration::ZERO), FreshnessTier::Realtime);
        assert_eq!(classify(Duration::from_secs(86_400 * 365)), FreshnessTier::Stale);
    }

    #[test]
    fn test_classify_is_monotonic() {
        // Sweep ages at 250ms resolution across all breakpoints
        let mut previous = classify(Duration::ZERO);
        for step in 1..=4_000u64 {
            let current = classify(Duration::from_millis(step * 250));
            assert!(
                current <= previous,
                "classify({}ms) = {} is fresher than a smaller age ({})",
                step * 250,
                current,
                previous
            );
            previous = current;
        }
    }

    #[test]
    fn test_satisfies_uses_recency_order() {
        assert!(FreshnessTier::Realtime.satisfies(FreshnessTier::NearRealtime));
        assert!(FreshnessTier::Recent.satisfies(FreshnessTier::Recent));
        assert!(!FreshnessTier::Recent.satisfies(FreshnessTier::NearRealtime));
        assert!(!FreshnessTier::Stale.satisfies(FreshnessTier::Recent));
    }

    #[test]
    fn test_custom_breakpoints() {
        let bp = FreshnessBreakpoints::new(
            Duration::from_secs(5),
            Duration::from_secs(10),
            Duration::from_secs(20),
        )
        .unwrap();
        assert_eq!(bp.classify(Duration::from_secs(4)), FreshnessTier::Realtime);
        assert_eq!(bp.classify(Duration::from_secs(5)), FreshnessTier::NearRealtime);
        assert_eq!(bp.classify(Duration::from_secs(19)), FreshnessTier::Recent);
        assert_eq!(bp.classify(Duration::from_secs(20)), FreshnessTier::Stale);
    }

    #[test]
    fn test_breakpoints_reject_non_increasing() {
        assert!(FreshnessBreakpoints::new(
            Duration::from_secs(60),
            Duration::from_secs(60),
            Duration::from_secs(900),
        )
        .is_err());
        assert!(FreshnessBreakpoints::new(
            Duration::ZERO,
            Duration::from_secs(1),
            Duration::from_secs(2),
        )
        .is_err());
    }

    #[test]
    fn test_tier_parse_and_display() {
        for tier in [
            FreshnessTier::Realtime,
            FreshnessTier::NearRealtime,
            FreshnessTier::Recent,
            FreshnessTier::Stale,
        ] {
            assert_eq!(tier.to_string().parse::<FreshnessTier>().unwrap(), tier);
        }
        assert!("fresh".parse::<FreshnessTier>().is_err());
    }
}
