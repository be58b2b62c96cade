//! Simulated source
//!
//! Produces one reading per virtual provider around a configured base value.
//! Used by `freshdatad` when no real fetchers are wired in.
//!
//! # Params
//! - `base` (required): center value; a non-numeric base yields text readings
//! - `jitter`: relative spread per provider (default 0.001 = ±0.1%)
//! - `providers`: readings per fetch (default 2)
//! - `fail_rate`: probability in [0, 1] that a fetch fails (default 0)

use crate::fetch::{FetchError, SourceFetcher, SourceParams};
use async_trait::async_trait;
use freshdata_common::{time, ReadingValue, SourceReading};
use rand::Rng;
use std::str::FromStr;

const DEFAULT_JITTER: f64 = 0.001;
const DEFAULT_PROVIDERS: usize = 2;

/// Jittered readings from several virtual providers
#[derive(Debug, Clone)]
pub struct SimulatedSource {
    name: String,
}

impl SimulatedSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn generate(&self, params: &SourceParams) -> Result<Vec<SourceReading>, FetchError> {
        let base = params
            .get("base")
            .ok_or_else(|| FetchError::BadResponse(format!("{}: missing 'base' param", self.name)))?;
        let jitter: f64 = param(params, "jitter", DEFAULT_JITTER)?;
        let providers: usize = param(params, "providers", DEFAULT_PROVIDERS)?;
        let fail_rate: f64 = param(params, "fail_rate", 0.0)?;

        let mut rng = rand::thread_rng();
        if fail_rate > 0.0 && rng.gen_bool(fail_rate.clamp(0.0, 1.0)) {
            return Err(FetchError::Network(format!("{}: simulated outage", self.name)));
        }

        let observed_at = time::now();
        let readings = (1..=providers)
            .map(|n| {
                let value = match base.parse::<f64>() {
                    Ok(center) if jitter > 0.0 => {
                        ReadingValue::Numeric(center * (1.0 + rng.gen_range(-jitter..=jitter)))
                    }
                    Ok(center) => ReadingValue::Numeric(center),
                    Err(_) => ReadingValue::Text(base.clone()),
                };
                SourceReading::new(format!("{}-{}", self.name, n), value, observed_at)
            })
            .collect();
        Ok(readings)
    }
}

fn param<T: FromStr>(params: &SourceParams, key: &str, default: T) -> Result<T, FetchError> {
    match params.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| FetchError::BadResponse(format!("invalid '{}' param: {}", key, raw))),
    }
}

#[async_trait]
impl SourceFetcher for SimulatedSource {
    async fn fetch(
        &self,
        data_type_id: &str,
        params: &SourceParams,
    ) -> Result<Vec<SourceReading>, FetchError> {
        let readings = self.generate(params)?;
        tracing::trace!(source = %self.name, data_type = data_type_id, count = readings.len(), "Simulated fetch");
        Ok(readings)
    }
}
