//! Configuration loading and the data type registry
//!
//! Config file resolution follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. `FRESHDATA_CONFIG` environment variable
//! 3. User then system TOML file (`~/.config/freshdata/config.toml`, `/etc/freshdata/config.toml`)
//! 4. Compiled defaults (fallback)
//!
//! A missing config file is never fatal: a warning is logged and compiled
//! defaults are used. A file that exists but fails to parse or validate is an
//! error.

use crate::freshness::{
    FreshnessBreakpoints, FreshnessTier, DEFAULT_NEAR_REALTIME_SECS, DEFAULT_REALTIME_SECS,
    DEFAULT_RECENT_SECS,
};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "FRESHDATA_CONFIG";

pub const DEFAULT_RETRY_COUNT: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2_000;
pub const DEFAULT_RETRY_BACKOFF: f64 = 1.0;
pub const DEFAULT_MAX_RETRY_DELAY_MS: u64 = 30_000;
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MIN_SOURCES: usize = 2;
pub const DEFAULT_CONSISTENCY_THRESHOLD: f64 = 0.95;
pub const DEFAULT_TICK_SECS: u64 = 10;
pub const DEFAULT_LEDGER_CAPACITY: usize = 1_000;
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

// ============================================================================
// DataTypeConfig
// ============================================================================

/// Refresh, retry and validation policy for one data type
///
/// Immutable once loaded into a [`DataTypeRegistry`].
#[derive(Debug, Clone, PartialEq)]
pub struct DataTypeConfig {
    pub id: String,
    /// How often the monitor proactively refreshes
    pub refresh_interval: Duration,
    /// Hard ceiling; older cache is never acceptable and older readings are excluded
    pub max_age: Duration,
    /// Minimum tier a cache hit must satisfy to be served without refresh
    pub required_tier: FreshnessTier,
    /// Fetch attempts per source (at least 1)
    pub retry_count: u32,
    /// Wait before the second attempt
    pub retry_delay: Duration,
    /// Delay multiplier applied after each failed attempt (1.0 = fixed delay)
    pub retry_backoff: f64,
    /// Upper bound for the grown delay
    pub max_retry_delay: Duration,
    /// Upper bound for a single fetch call
    pub fetch_timeout: Duration,
    /// Validator's minimum evidence count
    pub min_sources: usize,
    /// Validator's agreement bar (0.0-1.0)
    pub consistency_threshold: f64,
}

impl DataTypeConfig {
    /// Config with default retry and validation policy
    pub fn new(
        id: impl Into<String>,
        refresh_interval: Duration,
        max_age: Duration,
        required_tier: FreshnessTier,
    ) -> Self {
        Self {
            id: id.into(),
            refresh_interval,
            max_age,
            required_tier,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            max_retry_delay: Duration::from_millis(DEFAULT_MAX_RETRY_DELAY_MS),
            fetch_timeout: Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS),
            min_sources: DEFAULT_MIN_SOURCES,
            consistency_threshold: DEFAULT_CONSISTENCY_THRESHOLD,
        }
    }

    pub fn with_retry(mut self, retry_count: u32, retry_delay: Duration) -> Self {
        self.retry_count = retry_count;
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_backoff(mut self, multiplier: f64, max_retry_delay: Duration) -> Self {
        self.retry_backoff = multiplier;
        self.max_retry_delay = max_retry_delay;
        self
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    pub fn with_consensus(mut self, min_sources: usize, consistency_threshold: f64) -> Self {
        self.min_sources = min_sources;
        self.consistency_threshold = consistency_threshold;
        self
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Config("Data type id must not be empty".to_string()));
        }
        if self.refresh_interval.is_zero() {
            return Err(Error::Config(format!(
                "{}: refresh_interval must be greater than zero",
                self.id
            )));
        }
        if self.max_age.is_zero() {
            return Err(Error::Config(format!("{}: max_age must be greater than zero", self.id)));
        }
        if self.retry_count == 0 {
            return Err(Error::Config(format!("{}: retry_count must be at least 1", self.id)));
        }
        if !self.retry_backoff.is_finite() || self.retry_backoff < 1.0 {
            return Err(Error::Config(format!(
                "{}: retry_backoff must be a finite value >= 1.0 (got {})",
                self.id, self.retry_backoff
            )));
        }
        if self.fetch_timeout.is_zero() {
            return Err(Error::Config(format!(
                "{}: fetch_timeout must be greater than zero",
                self.id
            )));
        }
        if !(0.0..=1.0).contains(&self.consistency_threshold) {
            return Err(Error::Config(format!(
                "{}: consistency_threshold must be within [0, 1] (got {})",
                self.id, self.consistency_threshold
            )));
        }
        Ok(())
    }
}

// ============================================================================
// TOML schema
// ============================================================================

/// `[[data_types]]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTypeSpec {
    pub id: String,
    pub refresh_interval_secs: u64,
    pub max_age_secs: u64,
    #[serde(default = "default_required_tier")]
    pub required_tier: FreshnessTier,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: f64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_min_sources")]
    pub min_sources: usize,
    #[serde(default = "default_consistency_threshold")]
    pub consistency_threshold: f64,
}

fn default_required_tier() -> FreshnessTier {
    FreshnessTier::NearRealtime
}
fn default_retry_count() -> u32 {
    DEFAULT_RETRY_COUNT
}
fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}
fn default_retry_backoff() -> f64 {
    DEFAULT_RETRY_BACKOFF
}
fn default_max_retry_delay_ms() -> u64 {
    DEFAULT_MAX_RETRY_DELAY_MS
}
fn default_fetch_timeout_ms() -> u64 {
    DEFAULT_FETCH_TIMEOUT_MS
}
fn default_min_sources() -> usize {
    DEFAULT_MIN_SOURCES
}
fn default_consistency_threshold() -> f64 {
    DEFAULT_CONSISTENCY_THRESHOLD
}

impl DataTypeSpec {
    pub fn to_config(&self) -> Result<DataTypeConfig> {
        let config = DataTypeConfig {
            id: self.id.clone(),
            refresh_interval: Duration::from_secs(self.refresh_interval_secs),
            max_age: Duration::from_secs(self.max_age_secs),
            required_tier: self.required_tier,
            retry_count: self.retry_count,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            retry_backoff: self.retry_backoff,
            max_retry_delay: Duration::from_millis(self.max_retry_delay_ms),
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
            min_sources: self.min_sources,
            consistency_threshold: self.consistency_threshold,
        };
        config.validate()?;
        Ok(config)
    }
}

impl From<&DataTypeConfig> for DataTypeSpec {
    fn from(config: &DataTypeConfig) -> Self {
        Self {
            id: config.id.clone(),
            refresh_interval_secs: config.refresh_interval.as_secs(),
            max_age_secs: config.max_age.as_secs(),
            required_tier: config.required_tier,
            retry_count: config.retry_count,
            retry_delay_ms: config.retry_delay.as_millis() as u64,
            retry_backoff: config.retry_backoff,
            max_retry_delay_ms: config.max_retry_delay.as_millis() as u64,
            fetch_timeout_ms: config.fetch_timeout.as_millis() as u64,
            min_sources: config.min_sources,
            consistency_threshold: config.consistency_threshold,
        }
    }
}

/// `[[sources]]` table: one fetcher registration, in priority order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub data_type: String,
    pub name: String,
    /// Opaque parameters handed to the fetcher on every call
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// `[logging]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// `[monitor]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSettings {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_ledger_capacity")]
    pub ledger_capacity: usize,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_tick_secs() -> u64 {
    DEFAULT_TICK_SECS
}
fn default_ledger_capacity() -> usize {
    DEFAULT_LEDGER_CAPACITY
}
fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            tick_secs: DEFAULT_TICK_SECS,
            ledger_capacity: DEFAULT_LEDGER_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// `[freshness]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreshnessSettings {
    #[serde(default = "default_realtime_secs")]
    pub realtime_secs: u64,
    #[serde(default = "default_near_realtime_secs")]
    pub near_realtime_secs: u64,
    #[serde(default = "default_recent_secs")]
    pub recent_secs: u64,
}

fn default_realtime_secs() -> u64 {
    DEFAULT_REALTIME_SECS
}
fn default_near_realtime_secs() -> u64 {
    DEFAULT_NEAR_REALTIME_SECS
}
fn default_recent_secs() -> u64 {
    DEFAULT_RECENT_SECS
}

impl Default for FreshnessSettings {
    fn default() -> Self {
        Self {
            realtime_secs: DEFAULT_REALTIME_SECS,
            near_realtime_secs: DEFAULT_NEAR_REALTIME_SECS,
            recent_secs: DEFAULT_RECENT_SECS,
        }
    }
}

impl FreshnessSettings {
    pub fn breakpoints(&self) -> Result<FreshnessBreakpoints> {
        FreshnessBreakpoints::new(
            Duration::from_secs(self.realtime_secs),
            Duration::from_secs(self.near_realtime_secs),
            Duration::from_secs(self.recent_secs),
        )
    }
}

/// Whole config file
///
/// An empty `data_types` list selects the compiled default registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub freshness: FreshnessSettings,
    #[serde(default)]
    pub data_types: Vec<DataTypeSpec>,
    #[serde(default)]
    pub sources: Vec<SourceSpec>,
}

impl TomlConfig {
    /// Build the registry and check that every source names a known data type
    pub fn registry(&self) -> Result<DataTypeRegistry> {
        let breakpoints = self.freshness.breakpoints()?;
        let registry = if self.data_types.is_empty() {
            DataTypeRegistry::with_defaults().with_breakpoints(breakpoints)
        } else {
            let configs = self
                .data_types
                .iter()
                .map(DataTypeSpec::to_config)
                .collect::<Result<Vec<_>>>()?;
            DataTypeRegistry::from_configs(configs)?.with_breakpoints(breakpoints)
        };

        for source in &self.sources {
            if !registry.contains(&source.data_type) {
                return Err(Error::Config(format!(
                    "Source '{}' references unknown data type '{}'",
                    source.name, source.data_type
                )));
            }
        }

        Ok(registry)
    }
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: TomlConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Write a TOML config file, creating parent directories as needed
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Resolve the config file path by priority; `None` means no candidate exists
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: user then system config file
    let user_config = dirs::config_dir().map(|d| d.join("freshdata").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }
    let system_config = PathBuf::from("/etc/freshdata/config.toml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

/// Load config by priority, falling back to compiled defaults
pub fn load_or_default(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    // Priority 4: compiled defaults
    let Some(path) = resolve_config_path(cli_arg) else {
        info!("No config file found, using compiled defaults");
        return Ok(TomlConfig::default());
    };

    if !path.exists() {
        warn!(
            "Config file {} does not exist, using compiled defaults",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    info!("Loading config from {}", path.display());
    let config = load_toml_config(&path)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    // Surface validation errors at load time rather than at first refresh
    config.registry()?;
    Ok(config)
}

// ============================================================================
// DataTypeRegistry
// ============================================================================

/// Static per-data-type configuration, looked up by id
///
/// Built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct DataTypeRegistry {
    configs: BTreeMap<String, DataTypeConfig>,
    breakpoints: FreshnessBreakpoints,
}

impl DataTypeRegistry {
    /// Build from validated configs, rejecting duplicate ids
    pub fn from_configs(configs: impl IntoIterator<Item = DataTypeConfig>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for config in configs {
            config.validate()?;
            let id = config.id.clone();
            if map.insert(id.clone(), config).is_some() {
                return Err(Error::Config(format!("Duplicate data type id: {}", id)));
            }
        }
        Ok(Self {
            configs: map,
            breakpoints: FreshnessBreakpoints::default(),
        })
    }

    /// Compiled default registry
    pub fn with_defaults() -> Self {
        let configs = [
            DataTypeConfig::new(
                "financial_market",
                Duration::from_secs(30),
                Duration::from_secs(300),
                FreshnessTier::NearRealtime,
            )
            .with_consensus(2, 0.95),
            DataTypeConfig::new(
                "stock_prices",
                Duration::from_secs(10),
                Duration::from_secs(60),
                FreshnessTier::Realtime,
            )
            .with_consensus(1, 0.95),
            DataTypeConfig::new(
                "crypto_prices",
                Duration::from_secs(5),
                Duration::from_secs(30),
                FreshnessTier::Realtime,
            )
            .with_consensus(2, 0.95),
            DataTypeConfig::new(
                "news",
                Duration::from_secs(60),
                Duration::from_secs(600),
                FreshnessTier::Recent,
            )
            .with_consensus(2, 0.90),
            DataTypeConfig::new(
                "economic_indicators",
                Duration::from_secs(300),
                Duration::from_secs(1800),
                FreshnessTier::NearRealtime,
            )
            .with_consensus(1, 0.98),
        ];

        Self {
            configs: configs.into_iter().map(|c| (c.id.clone(), c)).collect(),
            breakpoints: FreshnessBreakpoints::default(),
        }
    }

    pub fn with_breakpoints(mut self, breakpoints: FreshnessBreakpoints) -> Self {
        self.breakpoints = breakpoints;
        self
    }

    pub fn breakpoints(&self) -> &FreshnessBreakpoints {
        &self.breakpoints
    }

    pub fn get(&self, id: &str) -> Option<&DataTypeConfig> {
        self.configs.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.configs.contains_key(id)
    }

    /// Ids in sorted order
    pub fn ids(&self) -> Vec<String> {
        self.configs.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DataTypeConfig> {
        self.configs.values()
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_contents() {
        let registry = DataTypeRegistry::with_defaults();
        assert_eq!(registry.len(), 5);

        let crypto = registry.get("crypto_prices").unwrap();
        assert_eq!(crypto.refresh_interval, Duration::from_secs(5));
        assert_eq!(crypto.max_age, Duration::from_secs(30));
        assert_eq!(crypto.required_tier, FreshnessTier::Realtime);
        assert_eq!(crypto.retry_count, 3);
        assert_eq!(crypto.retry_delay, Duration::from_secs(2));

        let news = registry.get("news").unwrap();
        assert_eq!(news.required_tier, FreshnessTier::Recent);
        assert_eq!(news.consistency_threshold, 0.90);

        for config in registry.iter() {
            config.validate().unwrap();
        }
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let a = DataTypeConfig::new(
            "x",
            Duration::from_secs(1),
            Duration::from_secs(5),
            FreshnessTier::Realtime,
        );
        let err = DataTypeRegistry::from_configs(vec![a.clone(), a]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let config = DataTypeConfig::new(
            "x",
            Duration::from_secs(1),
            Duration::from_secs(5),
            FreshnessTier::Realtime,
        )
        .with_consensus(2, 1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_retries() {
        let config = DataTypeConfig::new(
            "x",
            Duration::from_secs(1),
            Duration::from_secs(5),
            FreshnessTier::Realtime,
        )
        .with_retry(0, Duration::from_millis(10));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_shrinking_backoff() {
        let config = DataTypeConfig::new(
            "x",
            Duration::from_secs(1),
            Duration::from_secs(5),
            FreshnessTier::Realtime,
        )
        .with_backoff(0.5, Duration::from_secs(1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_spec_round_trip_preserves_config() {
        let config = DataTypeConfig::new(
            "news",
            Duration::from_secs(60),
            Duration::from_secs(600),
            FreshnessTier::Recent,
        )
        .with_retry(4, Duration::from_millis(250))
        .with_consensus(3, 0.9);
        let spec = DataTypeSpec::from(&config);
        assert_eq!(spec.to_config().unwrap(), config);
    }

    #[test]
    fn test_empty_data_types_select_defaults() {
        let registry = TomlConfig::default().registry().unwrap();
        assert!(registry.contains("financial_market"));
        assert_eq!(registry.breakpoints(), &FreshnessBreakpoints::default());
    }
}
