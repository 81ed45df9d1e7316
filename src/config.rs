//! Run configuration - YAML file, then environment overrides, then CLI flags.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;

/// Largest `offset + limit` the terminology server serves for unsorted searches
pub const MAX_OFFSET_PLUS_PAGE_SIZE: u64 = 10_000;

/// Reference set whose members carry the ECL definitions
pub const QUERY_SPECIFICATION_REFSET: &str = "900000000000513000";

/// What a percentage threshold breach does to the set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdPolicy {
    /// Record a warning and carry on
    #[default]
    Warn,
    /// Stop the set before anything is applied
    Block,
}

impl std::str::FromStr for ThresholdPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "warn" => Ok(ThresholdPolicy::Warn),
            "block" => Ok(ThresholdPolicy::Block),
            other => Err(ConfigError::Invalid {
                key: "threshold_policy",
                message: format!("expected 'warn' or 'block', got '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefsetConfig {
    pub snowstorm_url: String,
    pub branch: String,
    pub query_refset_id: String,
    /// Pre-obtained session cookie, sent verbatim
    pub auth_cookie: Option<String>,
    pub poll_delay_ms: u64,
    pub max_poll_attempts: u32,
    pub percent_change_threshold: f64,
    pub threshold_policy: ThresholdPolicy,
    pub count_change_threshold: u64,
    pub ignore_count_threshold: bool,
    pub worker_pool: usize,
    pub page_concurrency: usize,
    pub page_size: u64,
    pub max_batch_size: usize,
    pub request_timeout_secs: u64,
    pub run_timeout_secs: Option<u64>,
    pub threshold_log: PathBuf,
    pub ticketing_url: Option<String>,
    pub process_name: Option<String>,
}

impl Default for RefsetConfig {
    fn default() -> Self {
        Self {
            snowstorm_url: String::new(),
            branch: "MAIN/SNOMEDCT-AU".to_string(),
            query_refset_id: QUERY_SPECIFICATION_REFSET.to_string(),
            auth_cookie: None,
            poll_delay_ms: 5_000,
            max_poll_attempts: 720,
            percent_change_threshold: 0.01,
            threshold_policy: ThresholdPolicy::Warn,
            count_change_threshold: 10_000,
            ignore_count_threshold: false,
            worker_pool: 4,
            page_concurrency: 8,
            page_size: 1_000,
            max_batch_size: 10_000,
            request_timeout_secs: 120,
            run_timeout_secs: None,
            threshold_log: PathBuf::from("threshold.txt"),
            ticketing_url: None,
            process_name: None,
        }
    }
}

impl RefsetConfig {
    /// Load from a YAML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: RefsetConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// File (if given) plus `ECL_REFSET_*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup. Takes the lookup as a
    /// closure so tests don't touch process-wide state.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ECL_REFSET_SNOWSTORM_URL") {
            self.snowstorm_url = v;
        }
        if let Some(v) = lookup("ECL_REFSET_BRANCH") {
            self.branch = v;
        }
        if let Some(v) = lookup("ECL_REFSET_AUTH_COOKIE") {
            self.auth_cookie = Some(v);
        }
        if let Some(v) = lookup("ECL_REFSET_POLL_DELAY_MS") {
            self.poll_delay_ms = parse_env("poll_delay_ms", &v)?;
        }
        if let Some(v) = lookup("ECL_REFSET_MAX_POLL_ATTEMPTS") {
            self.max_poll_attempts = parse_env("max_poll_attempts", &v)?;
        }
        if let Some(v) = lookup("ECL_REFSET_PERCENT_THRESHOLD") {
            self.percent_change_threshold = parse_env("percent_change_threshold", &v)?;
        }
        if let Some(v) = lookup("ECL_REFSET_THRESHOLD_POLICY") {
            self.threshold_policy = v.parse()?;
        }
        if let Some(v) = lookup("ECL_REFSET_COUNT_THRESHOLD") {
            self.count_change_threshold = parse_env("count_change_threshold", &v)?;
        }
        if let Some(v) = lookup("ECL_REFSET_IGNORE_COUNT_THRESHOLD") {
            self.ignore_count_threshold = parse_env("ignore_count_threshold", &v)?;
        }
        if let Some(v) = lookup("ECL_REFSET_WORKERS") {
            self.worker_pool = parse_env("worker_pool", &v)?;
        }
        if let Some(v) = lookup("ECL_REFSET_PAGE_CONCURRENCY") {
            self.page_concurrency = parse_env("page_concurrency", &v)?;
        }
        if let Some(v) = lookup("ECL_REFSET_RUN_TIMEOUT_SECS") {
            self.run_timeout_secs = Some(parse_env("run_timeout_secs", &v)?);
        }
        if let Some(v) = lookup("ECL_REFSET_TICKETING_URL") {
            self.ticketing_url = Some(v);
        }
        if let Some(v) = lookup("ECL_REFSET_PROCESS_NAME") {
            self.process_name = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.snowstorm_url.trim().is_empty() {
            return Err(ConfigError::Missing("snowstorm_url"));
        }
        url::Url::parse(&self.snowstorm_url).map_err(|e| ConfigError::Invalid {
            key: "snowstorm_url",
            message: e.to_string(),
        })?;
        if self.branch.trim().is_empty() {
            return Err(ConfigError::Missing("branch"));
        }
        if let Some(ticketing) = &self.ticketing_url {
            if ticketing.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    key: "ticketing_url",
                    message: "must not be empty".to_string(),
                });
            }
        }
        if self.worker_pool == 0 {
            return Err(invalid("worker_pool", "must be at least 1"));
        }
        if self.page_concurrency == 0 {
            return Err(invalid("page_concurrency", "must be at least 1"));
        }
        if self.page_size == 0 || self.page_size > MAX_OFFSET_PLUS_PAGE_SIZE {
            return Err(invalid(
                "page_size",
                &format!("must be between 1 and {}", MAX_OFFSET_PLUS_PAGE_SIZE),
            ));
        }
        if self.max_batch_size == 0 {
            return Err(invalid("max_batch_size", "must be at least 1"));
        }
        if self.max_poll_attempts == 0 {
            return Err(invalid("max_poll_attempts", "must be at least 1"));
        }
        if !(self.percent_change_threshold > 0.0 && self.percent_change_threshold <= 1.0) {
            return Err(invalid(
                "percent_change_threshold",
                "must be greater than 0 and at most 1",
            ));
        }
        Ok(())
    }

    pub fn poll_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_delay_ms)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}

fn invalid(key: &'static str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        message: message.to_string(),
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        message: format!("'{}': {}", value, e),
    })
}
