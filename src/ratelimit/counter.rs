//! Time windows and the persisted counters that track them.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::descriptor::RateLimitKey;

/// A concrete interval computed by a windowing strategy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Inclusive start of the window
    pub start: DateTime<Utc>,
    /// Exclusive end of the window
    pub end: DateTime<Utc>,
    /// Stable label correlating the window with its counter
    pub key: String,
}

impl TimeWindow {
    /// Create a window covering `[start, start + length)`, keyed `<start-rfc3339>_<secs>s`.
    pub fn new(start: DateTime<Utc>, length: Duration) -> Self {
        let end = start + length;
        Self {
            start,
            end,
            key: format!("{}_{}s", start.to_rfc3339(), length.num_seconds()),
        }
    }

    /// Length of the window.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Length of the window in whole seconds.
    pub fn duration_secs(&self) -> i64 {
        self.duration().num_seconds()
    }

    /// Whether `instant` falls inside the window.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

/// Align `now` to the start of the fixed window of `length` that contains it.
///
/// Returns `None` for non-positive lengths.
pub fn align_window_start(now: DateTime<Utc>, length: Duration) -> Option<DateTime<Utc>> {
    let size = length.num_seconds();
    if size <= 0 {
        return None;
    }
    let secs = now.timestamp();
    DateTime::from_timestamp(secs.div_euclid(size) * size, 0)
}

/// The strategy family that produced a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowType {
    Fixed,
    Sliding,
    Multi,
}

impl WindowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowType::Fixed => "fixed",
            WindowType::Sliding => "sliding",
            WindowType::Multi => "multi",
        }
    }
}

impl std::fmt::Display for WindowType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite identity of a persisted counter.
///
/// The sort key ends in the window length so that windows of different sizes
/// starting at the same instant keep separate counters. Adapters mapping onto
/// an existing `resource#operation` table must carry that suffix too.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryKey {
    /// `<identifier>#<window_start_unix>`
    pub pk: String,
    /// `<resource>#<operation>#<window_secs>`
    pub sk: String,
}

impl EntryKey {
    /// Key of the counter for `key` in `window`.
    pub fn for_window(key: &RateLimitKey, window: &TimeWindow) -> Self {
        Self {
            pk: format!("{}#{}", key.identifier, window.start.timestamp()),
            sk: format!("{}#{}", key.scope(), window.duration_secs()),
        }
    }
}

impl std::fmt::Display for EntryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}", self.pk, self.sk)
    }
}

/// A persisted counter, one per key and window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitEntry {
    pub pk: String,
    pub sk: String,
    /// Requests recorded in the window
    pub count: u64,
    pub window_type: WindowType,
    /// Key of the [`TimeWindow`] this entry counts
    pub window_id: String,
    pub identifier: String,
    pub resource: String,
    pub operation: String,
    /// Window start, epoch seconds
    pub window_start: i64,
    /// Store-side expiry, epoch seconds; never earlier than `window_start`
    pub ttl: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl RateLimitEntry {
    /// Build a counter for `key` in `window` holding `count` requests.
    ///
    /// The TTL is the window end padded by `ttl_secs`.
    pub fn new(
        key: &RateLimitKey,
        window: &TimeWindow,
        window_type: WindowType,
        count: u64,
        ttl_secs: i64,
        now: DateTime<Utc>,
    ) -> Self {
        let entry_key = EntryKey::for_window(key, window);
        let window_start = window.start.timestamp();
        Self {
            pk: entry_key.pk,
            sk: entry_key.sk,
            count,
            window_type,
            window_id: window.key.clone(),
            identifier: key.identifier.clone(),
            resource: key.resource.clone(),
            operation: key.operation.clone(),
            window_start,
            ttl: (window.end.timestamp() + ttl_secs.max(0)).max(window_start),
            created_at: now,
            updated_at: now,
            metadata: key.metadata.clone(),
        }
    }

    /// The composite identity of this entry.
    pub fn key(&self) -> EntryKey {
        EntryKey {
            pk: self.pk.clone(),
            sk: self.sk.clone(),
        }
    }

    /// Whether the store may expire this entry at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.ttl < now.timestamp()
    }
}
