use chrono::{DateTime, Duration, Utc};

use super::{sum_below, LimitOverrides, WindowStrategy};
use crate::ratelimit::counter::{align_window_start, TimeWindow, WindowType};
use crate::ratelimit::descriptor::RateLimitKey;

/// Approximates a moving window by summing fixed sub-buckets of `granularity`.
#[derive(Debug, Clone)]
pub struct SlidingWindowStrategy {
    window_size: Duration,
    granularity: Duration,
    default_limit: u64,
    overrides: LimitOverrides,
}

impl SlidingWindowStrategy {
    /// Upper bound on sub-buckets per window; each one costs a store read.
    pub const MAX_BUCKETS: i64 = 4096;

    /// Non-positive granularities fall back to one minute. Sub-second parts
    /// round up to the next whole second.
    pub fn new(window_size: Duration, granularity: Duration, default_limit: u64) -> Self {
        let granularity = if granularity <= Duration::zero() {
            Duration::minutes(1)
        } else {
            whole_seconds(granularity)
        };
        Self {
            window_size,
            granularity,
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

    pub fn granularity(&self) -> Duration {
        self.granularity
    }

    /// Number of sub-buckets spanning the window.
    pub fn bucket_count(&self) -> i64 {
        let window = whole_seconds(self.window_size).num_seconds();
        let step = self.granularity.num_seconds().max(1);
        window.div_euclid(step) + i64::from(window.rem_euclid(step) != 0)
    }
}

fn whole_seconds(duration: Duration) -> Duration {
    let truncated = Duration::seconds(duration.num_seconds());
    if truncated < duration {
        truncated.checked_add(&Duration::seconds(1)).unwrap_or(truncated)
    } else {
        truncated
    }
}

impl WindowStrategy for SlidingWindowStrategy {
    fn window_type(&self) -> WindowType {
        WindowType::Sliding
    }

    /// Sub-buckets newest first; the bucket containing `now` is the primary window.
    fn calculate_windows(&self, now: DateTime<Utc>) -> Vec<TimeWindow> {
        if self.window_size <= Duration::zero() {
            return Vec::new();
        }
        let count = self.bucket_count();
        if count > Self::MAX_BUCKETS {
            return Vec::new();
        }
        let Some(current) = align_window_start(now, self.granularity) else {
            return Vec::new();
        };
        let Some(oldest_allowed) = now.checked_sub_signed(self.window_size) else {
            return Vec::new();
        };

        let mut windows = Vec::with_capacity(count as usize);
        for i in 0..count {
            let start = i32::try_from(i)
                .ok()
                .and_then(|i| self.granularity.checked_mul(i))
                .and_then(|offset| current.checked_sub_signed(offset));
            let Some(start) = start else {
                return Vec::new();
            };
            let bucket = TimeWindow::new(start, self.granularity);
            if bucket.end <= oldest_allowed {
                break;
            }
            windows.push(bucket);
        }
        windows
    }

    fn get_limit(&self, key: &RateLimitKey) -> u64 {
        self.overrides.resolve(key, self.default_limit)
    }

    fn should_allow(&self, counts: &[u64], limit: u64) -> bool {
        sum_below(counts, limit)
    }
}
