//! Configuration management for windgate.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{LimiterError, Result};
use crate::ratelimit::StrategyConfig;

/// Environment variable prefix for configuration overrides.
const ENV_PREFIX: &str = "WINDGATE";

/// A per-minute and per-hour request allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    pub requests_per_minute: u64,
    pub requests_per_hour: u64,
}

/// Limiter behavior shared by every operation of a [`RateLimiter`](crate::ratelimit::RateLimiter).
///
/// Constructed once per limiter and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Hourly allowance used when no override matches
    #[serde(default = "default_requests_per_hour")]
    pub default_requests_per_hour: u64,

    /// Per-minute allowance used when no override matches
    #[serde(default = "default_requests_per_minute")]
    pub default_requests_per_minute: u64,

    /// Admit requests when the store is unavailable
    #[serde(default = "default_fail_open")]
    pub fail_open: bool,

    /// How long counters outlive their window before the store may expire them
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u32,

    /// Overrides keyed by identifier
    #[serde(default)]
    pub identifier_limits: HashMap<String, Limit>,

    /// Overrides keyed by resource
    #[serde(default)]
    pub resource_limits: HashMap<String, Limit>,

    /// Attempts made when concurrent callers race to create the same counter
    #[serde(default = "default_create_race_attempts")]
    pub create_race_attempts: u32,

    /// Upper bound of the jittered pause between create-race attempts
    #[serde(default = "default_create_race_backoff_ms")]
    pub create_race_backoff_ms: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            default_requests_per_hour: default_requests_per_hour(),
            default_requests_per_minute: default_requests_per_minute(),
            fail_open: default_fail_open(),
            ttl_hours: default_ttl_hours(),
            identifier_limits: HashMap::new(),
            resource_limits: HashMap::new(),
            create_race_attempts: default_create_race_attempts(),
            create_race_backoff_ms: default_create_race_backoff_ms(),
        }
    }
}

fn default_requests_per_hour() -> u64 {
    1000
}

fn default_requests_per_minute() -> u64 {
    100
}

fn default_fail_open() -> bool {
    true
}

fn default_ttl_hours() -> u32 {
    1
}

fn default_create_race_attempts() -> u32 {
    3
}

fn default_create_race_backoff_ms() -> u64 {
    10
}

/// The defaults: 1000/hour, 100/minute, fail open, one hour of TTL.
pub fn default_config() -> LimiterConfig {
    LimiterConfig::default()
}

impl LimiterConfig {
    /// Effective limits for a key: identifier override, then resource override, then defaults.
    pub fn limits_for(&self, identifier: &str, resource: &str) -> Limit {
        self.identifier_limits
            .get(identifier)
            .or_else(|| self.resource_limits.get(resource))
            .copied()
            .unwrap_or(Limit {
                requests_per_minute: self.default_requests_per_minute,
                requests_per_hour: self.default_requests_per_hour,
            })
    }

    /// TTL padding in seconds.
    pub fn ttl_secs(&self) -> i64 {
        i64::from(self.ttl_hours) * 3600
    }
}

/// Top-level configuration for the windgate binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Limiter behavior
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Windowing strategy
    #[serde(default)]
    pub strategy: StrategyConfig,
}

impl ServiceConfig {
    /// Load configuration from an optional YAML file layered under
    /// `WINDGATE_`-prefixed environment variables.
    ///
    /// Nested keys use a double underscore, e.g. `WINDGATE_LIMITER__FAIL_OPEN=false`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path, "Loading configuration file");
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| LimiterError::Config(e.to_string()))
    }

    /// Parse configuration from a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| LimiterError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }
}
