//! Scheduler configuration (builder-style options over immutable defaults)
//! and the process environment surface.

use std::time::Duration;

use anyhow::{bail, Result};

/// Tuning for the cycle coordinator. Defaults match the production cadence;
/// tests shrink them.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between discovery cycles.
    pub interval: Duration,
    /// Hard ceiling for one cycle.
    pub cycle_timeout: Duration,
    /// Concurrent validation/research workers.
    pub max_concurrency: usize,
    /// Pause after each URL validation, to smooth external rate limits.
    pub validation_delay: Duration,
    /// Pause between search queries.
    pub query_delay: Duration,
    /// Run a cycle immediately on startup.
    pub run_on_start: bool,
    /// Skip canonical URLs that already exist in the store.
    pub skip_seen_urls: bool,
    /// States substituted into `{state}` template placeholders. Templates
    /// without the placeholder (or an empty list) run verbatim.
    pub target_states: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            interval: Duration::from_secs(24 * 60 * 60),
            cycle_timeout: Duration::from_secs(30 * 60),
            max_concurrency: 5,
            validation_delay: Duration::from_millis(500),
            query_delay: Duration::from_millis(500),
            run_on_start: true,
            skip_seen_urls: true,
            target_states: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_cycle_timeout(mut self, cycle_timeout: Duration) -> Self {
        self.cycle_timeout = cycle_timeout;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_validation_delay(mut self, validation_delay: Duration) -> Self {
        self.validation_delay = validation_delay;
        self
    }

    pub fn with_query_delay(mut self, query_delay: Duration) -> Self {
        self.query_delay = query_delay;
        self
    }

    pub fn with_run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = run_on_start;
        self
    }

    pub fn with_skip_seen_urls(mut self, skip_seen_urls: bool) -> Self {
        self.skip_seen_urls = skip_seen_urls;
        self
    }

    pub fn with_target_states(mut self, target_states: Vec<String>) -> Self {
        self.target_states = target_states;
        self
    }
}

/// Process configuration, read once at startup. Missing required values
/// abort startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub llm_api_key: String,
    /// Root directory for the filesystem object store backend.
    pub object_store_account: String,
    pub object_store_key: String,
    pub object_store_secret: String,
    pub object_store_bucket: String,
    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env_or_default("DATABASE_URL", "");
        if database_url.is_empty() {
            bail!("DATABASE_URL is required");
        }
        let llm_api_key = env_or_default("LLM_API_KEY", "");
        if llm_api_key.is_empty() {
            bail!("LLM_API_KEY is required");
        }

        Ok(AppConfig {
            database_url,
            llm_api_key,
            object_store_account: env_or_default("OBJECT_STORE_ACCOUNT", "./artifacts"),
            object_store_key: env_or_default("OBJECT_STORE_KEY", ""),
            object_store_secret: env_or_default("OBJECT_STORE_SECRET", ""),
            object_store_bucket: env_or_default("OBJECT_STORE_BUCKET", "rfp-documents"),
            log_level: env_or_default("LOG_LEVEL", "info"),
        })
    }
}

fn env_or_default(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_production_cadence() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.interval, Duration::from_secs(86_400));
        assert_eq!(cfg.cycle_timeout, Duration::from_secs(1_800));
        assert_eq!(cfg.max_concurrency, 5);
        assert_eq!(cfg.validation_delay, Duration::from_millis(500));
        assert_eq!(cfg.query_delay, Duration::from_millis(500));
        assert!(cfg.run_on_start);
        assert!(cfg.skip_seen_urls);
        assert!(cfg.target_states.is_empty());
    }

    #[test]
    fn builder_options_override_each_field() {
        let cfg = SchedulerConfig::default()
            .with_interval(Duration::from_secs(12 * 60 * 60))
            .with_cycle_timeout(Duration::from_secs(45 * 60))
            .with_max_concurrency(10)
            .with_validation_delay(Duration::from_secs(1))
            .with_query_delay(Duration::from_secs(2))
            .with_run_on_start(false)
            .with_skip_seen_urls(false);

        assert_eq!(cfg.interval, Duration::from_secs(43_200));
        assert_eq!(cfg.cycle_timeout, Duration::from_secs(2_700));
        assert_eq!(cfg.max_concurrency, 10);
        assert_eq!(cfg.validation_delay, Duration::from_secs(1));
        assert_eq!(cfg.query_delay, Duration::from_secs(2));
        assert!(!cfg.run_on_start);
        assert!(!cfg.skip_seen_urls);
    }

    #[test]
    fn concurrency_floor_is_one() {
        let cfg = SchedulerConfig::default().with_max_concurrency(0);
        assert_eq!(cfg.max_concurrency, 1);
    }
}
