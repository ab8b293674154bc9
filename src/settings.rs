use std::time::Duration;

use serde::Serialize;

use crate::config::AppConfig;

const MAX_CONCURRENCY: usize = 16;
const MAX_ATTEMPTS: u32 = 10;
const MIN_GEOCODE_ADDRESS_LEN: usize = 6;

/// Runtime knobs for one enrichment batch.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentSettings {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub courtesy_delay: Duration,
    pub min_geocode_address_len: usize,
}

impl EnrichmentSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            concurrency: clamp_concurrency(config.enrich_concurrency),
            max_attempts: clamp_attempts(config.enrich_max_attempts),
            base_backoff: Duration::from_millis(config.enrich_base_backoff_ms),
            courtesy_delay: Duration::from_millis(config.enrich_courtesy_delay_ms),
            min_geocode_address_len: MIN_GEOCODE_ADDRESS_LEN,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = clamp_concurrency(concurrency);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = clamp_attempts(attempts);
        self
    }

    pub fn with_delays(mut self, base_backoff: Duration, courtesy_delay: Duration) -> Self {
        self.base_backoff = base_backoff;
        self.courtesy_delay = courtesy_delay;
        self
    }
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            concurrency: 3,
            max_attempts: 5,
            base_backoff: Duration::from_millis(2_000),
            courtesy_delay: Duration::from_millis(250),
            min_geocode_address_len: MIN_GEOCODE_ADDRESS_LEN,
        }
    }
}

fn clamp_concurrency(value: usize) -> usize {
    value.clamp(1, MAX_CONCURRENCY)
}

fn clamp_attempts(value: u32) -> u32 {
    value.clamp(1, MAX_ATTEMPTS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_out_of_range_knobs() {
        let mut config = AppConfig::from_env();
        config.enrich_concurrency = 0;
        config.enrich_max_attempts = 99;
        let settings = EnrichmentSettings::from_config(&config);
        assert_eq!(settings.concurrency, 1);
        assert_eq!(settings.max_attempts, MAX_ATTEMPTS);

        let widened = settings.with_concurrency(500);
        assert_eq!(widened.concurrency, MAX_CONCURRENCY);
    }

    #[test]
    fn defaults_are_conservative() {
        let settings = EnrichmentSettings::default();
        assert_eq!(settings.concurrency, 3);
        assert_eq!(settings.max_attempts, 5);
        assert_eq!(settings.base_backoff, Duration::from_millis(2_000));
    }
}
