use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::WindowStrategy;
use crate::ratelimit::counter::{align_window_start, TimeWindow, WindowType};
use crate::ratelimit::descriptor::RateLimitKey;

/// One window length and the requests allowed within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub max_requests: u64,
}

impl WindowConfig {
    pub fn new(duration: Duration, max_requests: u64) -> Self {
        Self {
            duration,
            max_requests,
        }
    }
}

/// Enforces several fixed windows at once; a request must pass all of them.
///
/// Windows are evaluated in configuration order, and `counts[i]` always
/// belongs to `windows[i]`.
#[derive(Debug, Clone)]
pub struct MultiWindowStrategy {
    windows: Vec<WindowConfig>,
}

impl MultiWindowStrategy {
    pub fn new(windows: Vec<WindowConfig>) -> Self {
        Self { windows }
    }

    pub fn windows(&self) -> &[WindowConfig] {
        &self.windows
    }
}

impl WindowStrategy for MultiWindowStrategy {
    fn window_type(&self) -> WindowType {
        WindowType::Multi
    }

    fn calculate_windows(&self, now: DateTime<Utc>) -> Vec<TimeWindow> {
        // Any unusable window would break positional alignment, so reject them all.
        self.windows
            .iter()
            .map(|config| {
                align_window_start(now, config.duration)
                    .map(|start| TimeWindow::new(start, config.duration))
            })
            .collect::<Option<Vec<_>>>()
            .unwrap_or_default()
    }

    /// The first window's maximum, for display.
    fn get_limit(&self, _key: &RateLimitKey) -> u64 {
        self.windows.first().map(|w| w.max_requests).unwrap_or(0)
    }

    fn should_allow(&self, counts: &[u64], _limit: u64) -> bool {
        if self.windows.is_empty() {
            return false;
        }
        self.windows
            .iter()
            .enumerate()
            .all(|(i, config)| counts.get(i).copied().unwrap_or(0) < config.max_requests)
    }

    fn window_limits(&self) -> Option<Vec<u64>> {
        Some(self.windows.iter().map(|w| w.max_requests).collect())
    }
}

mod duration_secs {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(duration.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = i64::deserialize(deserializer)?;
        Duration::try_seconds(secs).ok_or_else(|| serde::de::Error::custom("duration out of range"))
    }
}
