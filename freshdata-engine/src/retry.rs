//! Fetch retry logic
//!
//! **Algorithm:**
//! 1. Attempt the fetch, bounded by the per-attempt timeout
//! 2. If it returns readings, return them
//! 3. If it fails (error, timeout or empty list):
//!    a. If attempts remain: log WARN, sleep the current delay, retry
//!    b. Otherwise: log ERROR, return the last error
//!
//! **Backoff Strategy:**
//! - First delay: `retry_delay`
//! - Each further delay: previous × `retry_backoff`, capped at `max_retry_delay`
//! - `retry_backoff = 1.0` gives a fixed delay

use crate::fetch::FetchError;
use freshdata_common::{DataTypeConfig, SourceReading};
use std::future::Future;
use std::time::{Duration, Instant};

/// Attempt budget and pacing for one source
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
    pub backoff: f64,
    pub max_delay: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &DataTypeConfig) -> Self {
        Self {
            attempts: config.retry_count.max(1),
            delay: config.retry_delay,
            backoff: config.retry_backoff.max(1.0),
            max_delay: config.max_retry_delay,
            timeout: config.fetch_timeout,
        }
    }

    /// Delay before attempt `attempt + 1` (attempt counts from 1)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.backoff.powi(attempt.saturating_sub(1) as i32);
        let delay = self.delay.mul_f64(factor.min(1e6));
        delay.min(self.max_delay.max(self.delay))
    }
}

/// Readings from a successful attempt
#[derive(Debug, Clone)]
pub struct FetchSuccess {
    pub readings: Vec<SourceReading>,
    /// Attempts used, including the successful one
    pub attempts: u32,
    pub elapsed: Duration,
}

/// All attempts against one source failed
#[derive(Debug, Clone)]
pub struct FetchExhausted {
    pub attempts: u32,
    pub last_error: FetchError,
}

/// Run `operation` under `policy`
///
/// # Arguments
/// * `source_name` - Name for logging
/// * `policy` - Attempt budget, delays and per-attempt timeout
/// * `operation` - Closure producing one fetch attempt
pub async fn fetch_with_retry<F, Fut>(
    source_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<FetchSuccess, FetchExhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Vec<SourceReading>, FetchError>>,
{
    let start_time = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;

        if attempt > 1 {
            tracing::debug!(source = source_name, attempt, "Retrying fetch");
        }

        let outcome = match tokio::time::timeout(policy.timeout, operation()).await {
            Ok(Ok(readings)) if readings.is_empty() => Err(FetchError::Empty),
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(policy.timeout.as_millis() as u64)),
        };

        match outcome {
            Ok(readings) => {
                let elapsed = start_time.elapsed();
                if attempt > 1 {
                    tracing::debug!(
                        source = source_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Fetch succeeded after retry"
                    );
                }
                return Ok(FetchSuccess {
                    readings,
                    attempts: attempt,
                    elapsed,
                });
            }
            Err(err) => {
                if attempt >= policy.attempts {
                    tracing::error!(
                        source = source_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Fetch failed, retries exhausted: {}",
                        err
                    );
                    return Err(FetchExhausted {
                        attempts: attempt,
                        last_error: err,
                    });
                }

                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    source = source_name,
                    attempt,
                    max_attempts = policy.attempts,
                    backoff_ms = delay.as_millis() as u64,
                    "Fetch failed, will retry after backoff: {}",
                    err
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use freshdata_common::time;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            delay: Duration::from_millis(5),
            backoff: 1.0,
            max_delay: Duration::from_millis(50),
            timeout: Duration::from_millis(200),
        }
    }

    fn reading() -> Vec<SourceReading> {
        vec![SourceReading::new("yahoo", 27450.0, time::now())]
    }

    #[tokio::test]
    async fn test_succeeds_first_attempt() {
        let result = fetch_with_retry("yahoo", &policy(3), || async { Ok(reading()) })
            .await
            .unwrap();
        assert_eq!(result.attempts, 1);
        assert_eq!(result.readings.len(), 1);
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = fetch_with_retry("yahoo", &policy(3), || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(FetchError::Network("connection reset".into()))
                } else {
                    Ok(reading())
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_after_retry_count() {
        let calls = Arc::new(AtomicU32::new(0));
        let err = fetch_with_retry("yahoo", &policy(3), || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<Vec<SourceReading>, _>(FetchError::BadResponse("HTTP 503".into()))
            }
        })
        .await
        .unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.last_error, FetchError::BadResponse("HTTP 503".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_empty_result_counts_as_failure() {
        let err = fetch_with_retry("yahoo", &policy(2), || async { Ok(Vec::new()) })
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 2);
        assert_eq!(err.last_error, FetchError::Empty);
    }

    #[tokio::test]
    async fn test_slow_attempt_times_out() {
        let mut p = policy(1);
        p.timeout = Duration::from_millis(20);
        let err = fetch_with_retry("yahoo", &p, || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(reading())
        })
        .await
        .unwrap_err();
        assert_eq!(err.last_error, FetchError::Timeout(20));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let p = RetryPolicy {
            attempts: 5,
            delay: Duration::from_millis(100),
            backoff: 2.0,
            max_delay: Duration::from_millis(350),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(p.delay_after(1), Duration::from_millis(100));
        assert_eq!(p.delay_after(2), Duration::from_millis(200));
        assert_eq!(p.delay_after(3), Duration::from_millis(350));
        assert_eq!(p.delay_after(10), Duration::from_millis(350));
    }

    #[test]
    fn test_fixed_delay_by_default() {
        let config = DataTypeConfig::new(
            "news",
            Duration::from_secs(60),
            Duration::from_secs(600),
            freshdata_common::FreshnessTier::Recent,
        );
        let p = RetryPolicy::from_config(&config);
        assert_eq!(p.attempts, 3);
        assert_eq!(p.delay_after(1), Duration::from_secs(2));
        assert_eq!(p.delay_after(2), Duration::from_secs(2));
    }
}
