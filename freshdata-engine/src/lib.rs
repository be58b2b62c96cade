//! # freshdata engine
//!
//! Freshness cache and cross-source consistency validation for perishable
//! external values (prices, indices, headlines).
//!
//! **Components:**
//! - [`cache`]: latest accepted value per data type, tier recomputed on read
//! - [`validator`]: reduces source readings to a confidence-scored consensus
//! - [`coordinator`]: fetch with retry, validate, cache; single-flight per data type
//! - [`hub`]: per-data-type update handlers
//! - [`monitor`]: background refresh of entries past their refresh interval
//! - [`ledger`]: bounded record of validation results with summary statistics
//! - [`service`]: context object bundling the above for collaborators

pub mod cache;
pub mod coordinator;
pub mod error;
pub mod fetch;
pub mod health;
pub mod hub;
pub mod ledger;
pub mod monitor;
pub mod retry;
pub mod service;
pub mod sources;
pub mod validator;

pub use cache::{CacheEntry, CacheStore};
pub use coordinator::{RefreshCoordinator, RefreshOutcome, RefreshStatus};
pub use error::{Error, Result};
pub use fetch::{FetchError, SourceDirectory, SourceFetcher, SourceParams};
pub use hub::{FnHandler, HandlerError, SubscriberHub, SubscriptionId, UpdateHandler};
pub use ledger::{LedgerSummary, ValidationLedger};
pub use monitor::{MonitorHandle, MonitorLoop, MonitorStats};
pub use service::{FreshnessService, SystemStatus, ValueView};
pub use validator::ConsistencyValidator;
