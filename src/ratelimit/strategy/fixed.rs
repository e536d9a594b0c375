use chrono::{DateTime, Duration, Utc};

use super::{sum_below, LimitOverrides, WindowStrategy};
use crate::ratelimit::counter::{align_window_start, TimeWindow, WindowType};
use crate::ratelimit::descriptor::RateLimitKey;

/// Counts requests in windows aligned to multiples of `window_size`.
#[derive(Debug, Clone)]
pub struct FixedWindowStrategy {
    window_size: Duration,
    default_limit: u64,
    overrides: LimitOverrides,
}

impl FixedWindowStrategy {
    pub fn new(window_size: Duration, default_limit: u64) -> Self {
        Self {
            window_size,
            default_limit,
            overrides: LimitOverrides::default(),
        }
    }

    /// Override the limit for one identifier.
    pub fn set_identifier_limit(&mut self, identifier: impl Into<String>, limit: u64) {
        self.overrides.set_identifier(identifier, limit);
    }

    /// Override the limit for one resource.
    pub fn set_resource_limit(&mut self, resource: impl Into<String>, limit: u64) {
        self.overrides.set_resource(resource, limit);
    }

    pub fn window_size(&self) -> Duration {
        self.window_size
    }
}

impl WindowStrategy for FixedWindowStrategy {
    fn window_type(&self) -> WindowType {
        WindowType::Fixed
    }

    fn calculate_windows(&self, now: DateTime<Utc>) -> Vec<TimeWindow> {
        align_window_start(now, self.window_size)
            .map(|start| vec![TimeWindow::new(start, self.window_size)])
            .unwrap_or_default()
    }

    fn get_limit(&self, key: &RateLimitKey) -> u64 {
        self.overrides.resolve(key, self.default_limit)
    }

    fn should_allow(&self, counts: &[u64], limit: u64) -> bool {
        sum_below(counts, limit)
    }
}
