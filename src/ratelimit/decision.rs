//! Results handed back to callers of the limiter.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Limit;

/// Outcome of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitDecision {
    pub allowed: bool,
    /// Count of the window that decided the outcome
    pub current_count: u64,
    /// Limit of the window that decided the outcome
    pub limit: u64,
    pub resets_at: DateTime<Utc>,
    /// Present iff the request was denied
    pub retry_after: Option<Duration>,
}

impl LimitDecision {
    /// An admitted request.
    pub fn allow(current_count: u64, limit: u64, resets_at: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            current_count,
            limit,
            resets_at,
            retry_after: None,
        }
    }

    /// A rejected request; `retry_after` is `resets_at - now`, floored at zero.
    pub fn deny(current_count: u64, limit: u64, resets_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let retry_after = (resets_at - now).to_std().unwrap_or(Duration::ZERO);
        Self {
            allowed: false,
            current_count,
            limit,
            resets_at,
            retry_after: Some(retry_after),
        }
    }

    /// The permissive decision synthesized when failing open.
    pub fn fail_open(limit: u64, resets_at: DateTime<Utc>) -> Self {
        Self::allow(0, limit, resets_at)
    }

    /// Requests left before the deciding window is exhausted.
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.current_count)
    }
}

/// Usage of one window in a [`UsageStats`] snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowUsage {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub count: u64,
    pub limit: u64,
    pub remaining: u64,
}

impl WindowUsage {
    pub fn new(window_start: DateTime<Utc>, window_end: DateTime<Utc>, count: u64, limit: u64) -> Self {
        Self {
            window_start,
            window_end,
            count,
            limit,
            remaining: limit.saturating_sub(count),
        }
    }
}

/// Read-only snapshot of a key's minute and hour usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub identifier: String,
    pub resource: String,
    pub operation: String,
    pub current_minute: WindowUsage,
    pub current_hour: WindowUsage,
    /// Override configured for the identifier, if any
    pub identifier_limit: Option<Limit>,
    /// Override configured for the resource, if any
    pub resource_limit: Option<Limit>,
    /// Requests seen in the enclosing hour
    pub total_requests: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_deny_sets_retry_after() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 15).unwrap();
        let resets_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap();

        let decision = LimitDecision::deny(5, 5, resets_at, now);
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after, Some(Duration::from_secs(45)));
        assert_eq!(decision.remaining(), 0);
    }

    #[test]
    fn test_deny_in_the_past_floors_at_zero() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 2, 0).unwrap();
        let resets_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap();

        let decision = LimitDecision::deny(5, 5, resets_at, now);
        assert_eq!(decision.retry_after, Some(Duration::ZERO));
    }

    #[test]
    fn test_allow_has_no_retry_after() {
        let resets_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap();
        let decision = LimitDecision::allow(3, 10, resets_at);
        assert!(decision.allowed);
        assert_eq!(decision.retry_after, None);
        assert_eq!(decision.remaining(), 7);
    }

    #[test]
    fn test_window_usage_remaining_saturates() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let usage = WindowUsage::new(start, start, 12, 10);
        assert_eq!(usage.remaining, 0);
    }
}
