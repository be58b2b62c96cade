//! # freshdata Common Library
//!
//! Shared code for the freshdata engine and its collaborators:
//! - Error types
//! - Freshness tiers and the age classifier
//! - Per-data-type configuration and TOML loading
//! - Source readings and validation records
//! - Event types (FreshEvent enum) and the EventBus
//! - Time helpers

pub mod config;
pub mod error;
pub mod events;
pub mod freshness;
pub mod time;
pub mod types;

pub use config::{DataTypeConfig, DataTypeRegistry};
pub use error::{Error, Result};
pub use freshness::{FreshnessBreakpoints, FreshnessTier};
pub use types::{IssueKind, ReadingValue, SourceReading, ValidationIssue, ValidationResult};
