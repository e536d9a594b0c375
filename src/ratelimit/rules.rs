//! Strategy rules loaded from configuration.
//!
//! A rule document names a strategy kind and its windows, e.g.
//!
//! ```yaml
//! kind: multi
//! windows:
//!   - window_secs: 60
//!     max_requests: 100
//!   - window_secs: 3600
//!     max_requests: 1000
//! ```

use std::collections::HashMap;
use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::strategy::{
    FixedWindowStrategy, MultiWindowStrategy, SlidingWindowStrategy, WindowConfig, WindowStrategy,
};
use crate::error::{LimiterError, Result};

/// Declarative description of a windowing strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StrategyConfig {
    /// One aligned window
    Fixed {
        #[serde(default = "default_window_secs")]
        window_secs: u64,
        max_requests: u64,
        #[serde(default)]
        identifier_limits: HashMap<String, u64>,
        #[serde(default)]
        resource_limits: HashMap<String, u64>,
    },
    /// Moving window summed from sub-buckets
    Sliding {
        #[serde(default = "default_window_secs")]
        window_secs: u64,
        /// Sub-bucket length; zero means one minute
        #[serde(default)]
        granularity_secs: u64,
        max_requests: u64,
        #[serde(default)]
        identifier_limits: HashMap<String, u64>,
        #[serde(default)]
        resource_limits: HashMap<String, u64>,
    },
    /// Several windows that must all pass
    Multi { windows: Vec<WindowRule> },
}

/// One window of a multi-window rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowRule {
    pub window_secs: u64,
    pub max_requests: u64,
}

fn default_window_secs() -> u64 {
    60
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig::Fixed {
            window_secs: default_window_secs(),
            max_requests: 100,
            identifier_limits: HashMap::new(),
            resource_limits: HashMap::new(),
        }
    }
}

fn duration(secs: u64, field: &str) -> Result<Duration> {
    if secs == 0 {
        return Err(LimiterError::Config(format!("{} must be positive", field)));
    }
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| LimiterError::Config(format!("{} is out of range", field)))
}

impl StrategyConfig {
    /// Parse a rule from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| LimiterError::Config(format!("Failed to parse strategy config: {}", e)))
    }

    /// Parse a rule from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading strategy configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Build the strategy this rule describes.
    pub fn build(&self) -> Result<Box<dyn WindowStrategy>> {
        match self {
            StrategyConfig::Fixed {
                window_secs,
                max_requests,
                identifier_limits,
                resource_limits,
            } => {
                let mut strategy = FixedWindowStrategy::new(duration(*window_secs, "window_secs")?, *max_requests);
                for (resource, limit) in resource_limits {
                    strategy.set_resource_limit(resource.clone(), *limit);
                }
                for (identifier, limit) in identifier_limits {
                    strategy.set_identifier_limit(identifier.clone(), *limit);
                }
                Ok(Box::new(strategy))
            }
            StrategyConfig::Sliding {
                window_secs,
                granularity_secs,
                max_requests,
                identifier_limits,
                resource_limits,
            } => {
                let granularity = match granularity_secs {
                    0 => Duration::zero(),
                    secs => duration(*secs, "granularity_secs")?,
                };
                let mut strategy = SlidingWindowStrategy::new(
                    duration(*window_secs, "window_secs")?,
                    granularity,
                    *max_requests,
                );
                if strategy.bucket_count() > SlidingWindowStrategy::MAX_BUCKETS {
                    return Err(LimiterError::Config(format!(
                        "sliding window needs more than {} buckets; raise granularity_secs",
                        SlidingWindowStrategy::MAX_BUCKETS
                    )));
                }
                for (resource, limit) in resource_limits {
                    strategy.set_resource_limit(resource.clone(), *limit);
                }
                for (identifier, limit) in identifier_limits {
                    strategy.set_identifier_limit(identifier.clone(), *limit);
                }
                Ok(Box::new(strategy))
            }
            StrategyConfig::Multi { windows } => {
                if windows.is_empty() {
                    return Err(LimiterError::Config(
                        "multi-window strategy needs at least one window".to_string(),
                    ));
                }
                let windows = windows
                    .iter()
                    .map(|w| -> Result<WindowConfig> {
                        Ok(WindowConfig::new(duration(w.window_secs, "window_secs")?, w.max_requests))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Box::new(MultiWindowStrategy::new(windows)))
            }
        }
    }
}
