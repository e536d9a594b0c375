//! Windowing strategies.
//!
//! A strategy turns "now" into the set of windows to count against, picks the
//! limit that applies to a key, and decides whether observed counts admit one
//! more request. Counts are always passed positionally: `counts[i]` is the
//! count of the `i`-th window returned by [`WindowStrategy::calculate_windows`].

mod fixed;
mod multi;
mod sliding;

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::counter::{TimeWindow, WindowType};
use super::descriptor::RateLimitKey;

pub use fixed::FixedWindowStrategy;
pub use multi::{MultiWindowStrategy, WindowConfig};
pub use sliding::SlidingWindowStrategy;

/// Contract shared by every windowing strategy.
pub trait WindowStrategy: Send + Sync + std::fmt::Debug {
    /// The family recorded on persisted counters.
    fn window_type(&self) -> WindowType;

    /// Windows to evaluate at `now`, primary window first.
    ///
    /// Empty when the strategy is misconfigured.
    fn calculate_windows(&self, now: DateTime<Utc>) -> Vec<TimeWindow>;

    /// The limit for `key`: identifier override, then resource override, then the default.
    fn get_limit(&self, key: &RateLimitKey) -> u64;

    /// Whether `counts`, aligned with the calculated windows, admit another request.
    fn should_allow(&self, counts: &[u64], limit: u64) -> bool;

    /// Per-window maxima aligned with the calculated windows, for strategies
    /// that enforce every window independently. `None` means the counts are
    /// summed and compared against [`get_limit`](Self::get_limit).
    fn window_limits(&self) -> Option<Vec<u64>> {
        None
    }
}

/// Identifier and resource overrides of a default limit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct LimitOverrides {
    identifier: HashMap<String, u64>,
    resource: HashMap<String, u64>,
}

impl LimitOverrides {
    pub(crate) fn set_identifier(&mut self, identifier: impl Into<String>, limit: u64) {
        self.identifier.insert(identifier.into(), limit);
    }

    pub(crate) fn set_resource(&mut self, resource: impl Into<String>, limit: u64) {
        self.resource.insert(resource.into(), limit);
    }

    pub(crate) fn resolve(&self, key: &RateLimitKey, default: u64) -> u64 {
        self.identifier
            .get(&key.identifier)
            .or_else(|| self.resource.get(&key.resource))
            .copied()
            .unwrap_or(default)
    }
}

fn sum_below(counts: &[u64], limit: u64) -> bool {
    let total = counts.iter().fold(0u64, |acc, c| acc.saturating_add(*c));
    total < limit
}
