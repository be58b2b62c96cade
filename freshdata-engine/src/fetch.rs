//! Source fetcher seam
//!
//! Fetchers are external collaborators: they turn `(data_type_id, params)`
//! into readings. A single fetcher may aggregate several upstream providers
//! and return one reading per provider, which is what cross-validation needs.

use async_trait::async_trait;
use freshdata_common::SourceReading;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// Parameters handed to a fetcher on every call
pub type SourceParams = BTreeMap<String, String>;

/// Failure of one fetch attempt
///
/// Retried locally by the coordinator and never surfaced to callers.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Bad response: {0}")]
    BadResponse(String),

    #[error("Source returned no readings")]
    Empty,
}

/// Collaborator producing readings for a data type
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(
        &self,
        data_type_id: &str,
        params: &SourceParams,
    ) -> Result<Vec<SourceReading>, FetchError>;
}

/// A fetcher registered for one data type
#[derive(Clone)]
pub struct RegisteredSource {
    pub name: String,
    pub params: SourceParams,
    pub fetcher: Arc<dyn SourceFetcher>,
}

/// Sources per data type, in priority order (registration order)
#[derive(Clone, Default)]
pub struct SourceDirectory {
    sources: HashMap<String, Vec<RegisteredSource>>,
}

impl SourceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a source after any already registered for `data_type_id`
    pub fn register(
        &mut self,
        data_type_id: impl Into<String>,
        name: impl Into<String>,
        params: SourceParams,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> &mut Self {
        self.sources
            .entry(data_type_id.into())
            .or_default()
            .push(RegisteredSource {
                name: name.into(),
                params,
                fetcher,
            });
        self
    }

    pub fn sources_for(&self, data_type_id: &str) -> &[RegisteredSource] {
        self.sources
            .get(data_type_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn source_count(&self) -> usize {
        self.sources.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use freshdata_common::time;

    struct Fixed(f64);

    #[async_trait]
    impl SourceFetcher for Fixed {
        async fn fetch(&self, _: &str, _: &SourceParams) -> Result<Vec<SourceReading>, FetchError> {
            Ok(vec![SourceReading::new("fixed", self.0, time::now())])
        }
    }

    #[test]
    fn test_directory_keeps_priority_order() {
        let mut directory = SourceDirectory::new();
        directory
            .register("crypto_prices", "coinbase", SourceParams::new(), Arc::new(Fixed(1.0)))
            .register("crypto_prices", "binance", SourceParams::new(), Arc::new(Fixed(2.0)))
            .register("news", "wire", SourceParams::new(), Arc::new(Fixed(3.0)));

        let names: Vec<&str> = directory
            .sources_for("crypto_prices")
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, vec!["coinbase", "binance"]);
        assert!(directory.sources_for("weather").is_empty());
        assert_eq!(directory.source_count(), 3);
    }
}
