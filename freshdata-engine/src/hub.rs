//! Subscriber hub: per-data-type fan-out of cache updates
//!
//! Handlers run in registration order. A handler that returns an error or
//! panics is logged and skipped; the remaining handlers still run and the
//! refresh that triggered the notification is unaffected.

use crate::cache::CacheEntry;
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

/// Error returned by a handler
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Listener for cache updates of one data type
///
/// # Example
/// ```rust,ignore
/// struct Ticker;
///
/// #[async_trait::async_trait]
/// impl UpdateHandler for Ticker {
///     fn name(&self) -> &str { "ticker" }
///
///     async fn on_update(&self, data_type_id: &str, entry: &CacheEntry) -> Result<(), HandlerError> {
///         println!("{} = {}", data_type_id, entry.value);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait UpdateHandler: Send + Sync {
    /// Name for logging
    fn name(&self) -> &str {
        "handler"
    }

    async fn on_update(&self, data_type_id: &str, entry: &CacheEntry) -> Result<(), HandlerError>;
}

/// Adapts a synchronous closure into an [`UpdateHandler`]
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&str, &CacheEntry) -> Result<(), HandlerError> + Send + Sync,
    {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> UpdateHandler for FnHandler<F>
where
    F: Fn(&str, &CacheEntry) -> Result<(), HandlerError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_update(&self, data_type_id: &str, entry: &CacheEntry) -> Result<(), HandlerError> {
        (self.f)(data_type_id, entry)
    }
}

/// Handle returned by [`SubscriberHub::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Delivery counts for one notification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyReport {
    pub delivered: usize,
    pub failed: usize,
}

struct Subscription {
    id: SubscriptionId,
    handler: Arc<dyn UpdateHandler>,
}

/// Typed pub/sub registry keyed by data type
#[derive(Default)]
pub struct SubscriberHub {
    subscriptions: RwLock<HashMap<String, Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl SubscriberHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, data_type_id: &str, handler: Arc<dyn UpdateHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        debug!(data_type = data_type_id, handler = handler.name(), "New subscriber");
        let mut subscriptions = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        subscriptions
            .entry(data_type_id.to_string())
            .or_default()
            .push(Subscription { id, handler });
        id
    }

    /// Remove a subscription; false if it was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for list in subscriptions.values_mut() {
            if let Some(pos) = list.iter().position(|s| s.id == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    /// Total handlers across all data types
    pub fn subscriber_count(&self) -> usize {
        let subscriptions = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        subscriptions.values().map(Vec::len).sum()
    }

    /// Invoke every handler registered for `data_type_id`
    pub async fn notify(&self, data_type_id: &str, entry: &CacheEntry) -> NotifyReport {
        // Snapshot the list so the lock is not held across handler awaits
        let handlers: Vec<Arc<dyn UpdateHandler>> = {
            let subscriptions = self
                .subscriptions
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            subscriptions
                .get(data_type_id)
                .map(|list| list.iter().map(|s| Arc::clone(&s.handler)).collect())
                .unwrap_or_default()
        };

        let mut report = NotifyReport::default();
        for handler in handlers {
            let outcome = AssertUnwindSafe(handler.on_update(data_type_id, entry))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(
                        data_type = data_type_id,
                        handler = handler.name(),
                        "Subscriber failed: {}",
                        e
                    );
                }
                Err(_) => {
                    report.failed += 1;
                    warn!(
                        data_type = data_type_id,
                        handler = handler.name(),
                        "Subscriber panicked"
                    );
                }
            }
        }
        report
    }
}
