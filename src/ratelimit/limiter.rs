//! Core rate limiter implementation.
//!
//! [`RateLimiter`] turns a strategy's windows into counter reads and
//! conditional writes against a shared [`WindowStore`]. It keeps no local
//! state beyond its injected clock, strategy and configuration, so any number
//! of limiter instances may share one store.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use tracing::{debug, instrument, trace, warn};

use super::backend::{Condition, CounterUpdate, TransactionalStore, WindowStore};
use super::counter::{align_window_start, EntryKey, RateLimitEntry, TimeWindow};
use super::decision::{LimitDecision, UsageStats, WindowUsage};
use super::descriptor::RateLimitKey;
use super::strategy::{FixedWindowStrategy, WindowStrategy};
use crate::clock::{Clock, SystemClock};
use crate::config::LimiterConfig;
use crate::context::Context;
use crate::error::{LimiterError, Result, StoreError};

/// Outcome of one conditional-increment attempt on the primary window.
enum Attempt {
    Allowed(u64),
    Denied(u64),
    /// Lost a race with a concurrent writer; safe to start over.
    Retry,
}

/// The rate limiter orchestrating strategies and store writes.
///
/// This struct is thread-safe and can be shared across multiple tasks.
pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
    strategy: Box<dyn WindowStrategy>,
    clock: Arc<dyn Clock>,
    config: LimiterConfig,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("strategy", &self.strategy)
            .field("clock", &self.clock)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builder applying defaults for every dependency left unset.
pub struct RateLimiterBuilder {
    store: Arc<dyn WindowStore>,
    strategy: Option<Box<dyn WindowStrategy>>,
    clock: Option<Arc<dyn Clock>>,
    config: Option<LimiterConfig>,
}

impl RateLimiterBuilder {
    pub fn strategy(mut self, strategy: impl WindowStrategy + 'static) -> Self {
        self.strategy = Some(Box::new(strategy));
        self
    }

    pub fn boxed_strategy(mut self, strategy: Box<dyn WindowStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn config(mut self, config: LimiterConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the limiter.
    ///
    /// Defaults: [`LimiterConfig::default`], the [`SystemClock`], and a
    /// one-minute fixed window at the configured per-minute limit with the
    /// configured identifier and resource overrides.
    pub fn build(self) -> RateLimiter {
        let config = self.config.unwrap_or_default();
        let strategy = self
            .strategy
            .unwrap_or_else(|| Box::new(default_strategy(&config)));
        RateLimiter {
            store: self.store,
            strategy,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            config,
        }
    }
}

fn default_strategy(config: &LimiterConfig) -> FixedWindowStrategy {
    let mut strategy = FixedWindowStrategy::new(Duration::minutes(1), config.default_requests_per_minute);
    for (resource, limit) in &config.resource_limits {
        strategy.set_resource_limit(resource.clone(), limit.requests_per_minute);
    }
    for (identifier, limit) in &config.identifier_limits {
        strategy.set_identifier_limit(identifier.clone(), limit.requests_per_minute);
    }
    strategy
}

impl RateLimiter {
    /// Create a limiter over `store` with default strategy, clock and configuration.
    pub fn new(store: Arc<dyn WindowStore>) -> Self {
        Self::builder(store).build()
    }

    /// Create a limiter with an explicit strategy and configuration.
    pub fn with_config(
        store: Arc<dyn WindowStore>,
        strategy: Box<dyn WindowStrategy>,
        config: LimiterConfig,
    ) -> Self {
        Self::builder(store)
            .boxed_strategy(strategy)
            .config(config)
            .build()
    }

    pub fn builder(store: Arc<dyn WindowStore>) -> RateLimiterBuilder {
        RateLimiterBuilder {
            store,
            strategy: None,
            clock: None,
            config: None,
        }
    }

    /// Replace the clock used to compute windows.
    pub fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = clock;
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn strategy(&self) -> &dyn WindowStrategy {
        self.strategy.as_ref()
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Decide whether `key` may make a request, without recording it.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn check_limit(&self, ctx: &Context, key: &RateLimitKey) -> Result<LimitDecision> {
        key.validate()?;
        let now = self.clock.now();
        let windows = self.windows(now)?;
        self.check_windows(ctx, key, &windows, now).await
    }

    /// Count a request against the primary window without checking the limit.
    ///
    /// Meant to follow a [`check_limit`](Self::check_limit) that admitted the request.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn record_request(&self, ctx: &Context, key: &RateLimitKey) -> Result<()> {
        key.validate()?;
        let now = self.clock.now();
        let windows = self.windows(now)?;

        let count = self
            .record_window(ctx, key, &windows[0], now)
            .await
            .map_err(|e| LimiterError::store("failed to record request", e))?;
        trace!(count = count, window = %windows[0].key, "Recorded request");
        Ok(())
    }

    /// Atomically decide and, if admitted, count the request.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn check_and_increment(&self, ctx: &Context, key: &RateLimitKey) -> Result<LimitDecision> {
        key.validate()?;
        let now = self.clock.now();
        let windows = self.windows(now)?;

        match self.strategy.window_limits() {
            Some(maxima) => match self.store.transactional() {
                Some(tx) => self.increment_all_windows(ctx, tx, key, &windows, &maxima, now).await,
                None => self.check_then_record(ctx, key, &windows, now).await,
            },
            None => self.increment_primary(ctx, key, &windows, now).await,
        }
    }

    /// Snapshot of the key's current minute and hour counters.
    ///
    /// Store errors are always returned; this path never fails open.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn get_usage(&self, ctx: &Context, key: &RateLimitKey) -> Result<UsageStats> {
        key.validate()?;
        let now = self.clock.now();
        let minute = aligned_window(now, Duration::minutes(1))?;
        let hour = aligned_window(now, Duration::hours(1))?;

        let minute_count = self
            .load_count(ctx, key, &minute)
            .await
            .map_err(|e| LimiterError::store("failed to load usage", e))?;
        let hour_count = self
            .load_count(ctx, key, &hour)
            .await
            .map_err(|e| LimiterError::store("failed to load usage", e))?;

        let limits = self.config.limits_for(&key.identifier, &key.resource);
        Ok(UsageStats {
            identifier: key.identifier.clone(),
            resource: key.resource.clone(),
            operation: key.operation.clone(),
            current_minute: WindowUsage::new(minute.start, minute.end, minute_count, limits.requests_per_minute),
            current_hour: WindowUsage::new(hour.start, hour.end, hour_count, limits.requests_per_hour),
            identifier_limit: self.config.identifier_limits.get(&key.identifier).copied(),
            resource_limit: self.config.resource_limits.get(&key.resource).copied(),
            total_requests: minute_count.max(hour_count),
        })
    }

    fn windows(&self, now: DateTime<Utc>) -> Result<Vec<TimeWindow>> {
        let windows = self.strategy.calculate_windows(now);
        if windows.is_empty() {
            return Err(LimiterError::Internal("no windows calculated".to_string()));
        }
        Ok(windows)
    }

    async fn check_windows(
        &self,
        ctx: &Context,
        key: &RateLimitKey,
        windows: &[TimeWindow],
        now: DateTime<Utc>,
    ) -> Result<LimitDecision> {
        match self.load_counts(ctx, key, windows).await {
            Ok(counts) => Ok(self.evaluate(key, windows, &counts, now)),
            Err(e) => self.on_failure(key, windows, LimiterError::store("failed to check rate limit", e)),
        }
    }

    /// Build the decision for `counts`, aligned with `windows`.
    fn evaluate(
        &self,
        key: &RateLimitKey,
        windows: &[TimeWindow],
        counts: &[u64],
        now: DateTime<Utc>,
    ) -> LimitDecision {
        let limit = self.strategy.get_limit(key);
        let allowed = self.strategy.should_allow(counts, limit);
        let primary = &windows[0];

        let decision = match self.strategy.window_limits() {
            Some(_) if allowed => LimitDecision::allow(counts[0], limit, primary.end),
            Some(maxima) => {
                // Report the exhausted window that stays exhausted the longest.
                let binding = windows
                    .iter()
                    .zip(counts)
                    .zip(&maxima)
                    .filter(|((_, count), max)| *count >= *max)
                    .max_by_key(|((window, _), _)| window.end);
                match binding {
                    Some(((window, count), max)) => LimitDecision::deny(*count, *max, window.end, now),
                    None => LimitDecision::deny(counts[0], limit, primary.end, now),
                }
            }
            None => {
                let total = counts.iter().fold(0u64, |acc, c| acc.saturating_add(*c));
                if allowed {
                    LimitDecision::allow(total, limit, primary.end)
                } else {
                    LimitDecision::deny(total, limit, primary.end, now)
                }
            }
        };

        if !decision.allowed {
            debug!(
                key = %key,
                count = decision.current_count,
                limit = decision.limit,
                "Rate limit exceeded"
            );
        }
        decision
    }

    /// Conditional increment of the primary window, retrying lost create races.
    async fn increment_primary(
        &self,
        ctx: &Context,
        key: &RateLimitKey,
        windows: &[TimeWindow],
        now: DateTime<Utc>,
    ) -> Result<LimitDecision> {
        let limit = self.strategy.get_limit(key);
        let primary = &windows[0];

        // Closed sub-buckets of a sliding window only consume budget.
        let closed = match self.load_counts(ctx, key, &windows[1..]).await {
            Ok(counts) => counts.iter().fold(0u64, |acc, c| acc.saturating_add(*c)),
            Err(e) => {
                return self.on_failure(key, windows, LimiterError::store("failed to check rate limit", e))
            }
        };
        let budget = limit.saturating_sub(closed);

        let attempts = self.config.create_race_attempts.max(1);
        for attempt in 1..=attempts {
            match self.try_increment(ctx, key, primary, budget, now).await {
                Ok(Attempt::Allowed(count)) => {
                    trace!(count = count, window = %primary.key, "Request admitted");
                    return Ok(LimitDecision::allow(closed.saturating_add(count), limit, primary.end));
                }
                Ok(Attempt::Denied(count)) => {
                    debug!(key = %key, count = count, limit = limit, "Rate limit exceeded");
                    return Ok(LimitDecision::deny(closed.saturating_add(count), limit, primary.end, now));
                }
                Ok(Attempt::Retry) => {
                    debug!(key = %key, attempt = attempt, "Lost counter race, retrying");
                    if attempt < attempts {
                        self.backoff().await;
                    }
                }
                Err(e) => return self.on_failure(key, windows, e),
            }
        }

        warn!(key = %key, attempts = attempts, "Create race retries exhausted");
        self.on_failure(
            key,
            windows,
            LimiterError::Internal("create race retries exhausted".to_string()),
        )
    }

    async fn try_increment(
        &self,
        ctx: &Context,
        key: &RateLimitKey,
        window: &TimeWindow,
        budget: u64,
        now: DateTime<Utc>,
    ) -> Result<Attempt> {
        let update = CounterUpdate::increment(self.seed(key, window, now), now)
            .with_condition(Condition::CountBelow(budget));
        match ctx.run(self.store.increment(update)).await {
            Ok(count) => return Ok(Attempt::Allowed(count)),
            Err(StoreError::ConditionFailed) => {}
            Err(e) => return Err(LimiterError::store("failed to increment rate limit", e)),
        }

        // Either the counter is missing or it is at the budget.
        match ctx.run(self.store.get(&EntryKey::for_window(key, window))).await {
            Ok(entry) if entry.count >= budget => return Ok(Attempt::Denied(entry.count)),
            // Created by someone else since our write; try again.
            Ok(_) => return Ok(Attempt::Retry),
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(LimiterError::store("failed to load rate limit entry", e)),
        }

        if budget == 0 {
            return Ok(Attempt::Denied(0));
        }

        let entry = RateLimitEntry::new(
            key,
            window,
            self.strategy.window_type(),
            1,
            self.config.ttl_secs(),
            now,
        );
        match ctx.run(self.store.create_if_not_exists(entry)).await {
            Ok(()) => Ok(Attempt::Allowed(1)),
            Err(StoreError::ConditionFailed) => Ok(Attempt::Retry),
            Err(e) => Err(LimiterError::store("failed to create rate limit entry", e)),
        }
    }

    /// Check every window and increment them all in one transaction.
    async fn increment_all_windows(
        &self,
        ctx: &Context,
        tx: &dyn TransactionalStore,
        key: &RateLimitKey,
        windows: &[TimeWindow],
        maxima: &[u64],
        now: DateTime<Utc>,
    ) -> Result<LimitDecision> {
        let counts = match self.load_counts(ctx, key, windows).await {
            Ok(counts) => counts,
            Err(e) => {
                return self.on_failure(key, windows, LimiterError::store("failed to check rate limit", e))
            }
        };
        let decision = self.evaluate(key, windows, &counts, now);
        if !decision.allowed {
            return Ok(decision);
        }

        let updates = windows
            .iter()
            .zip(maxima)
            .map(|(window, max)| {
                CounterUpdate::increment(self.seed(key, window, now), now)
                    .with_condition(Condition::AbsentOrCountBelow(*max))
            })
            .collect();

        match ctx.run(tx.transact_write(updates)).await {
            Ok(()) => Ok(LimitDecision {
                current_count: counts[0].saturating_add(1),
                ..decision
            }),
            Err(StoreError::ConditionFailed) => {
                debug!(key = %key, "Transaction condition failed, denying request");
                Ok(LimitDecision::deny(counts[0], decision.limit, windows[0].end, now))
            }
            Err(e) => self.on_failure(
                key,
                windows,
                LimiterError::store("failed to write rate limit transaction", e),
            ),
        }
    }

    /// Check, then increment each window on its own.
    ///
    /// Not atomic across windows: a failed increment leaves the windows
    /// disagreeing until they roll over.
    async fn check_then_record(
        &self,
        ctx: &Context,
        key: &RateLimitKey,
        windows: &[TimeWindow],
        now: DateTime<Utc>,
    ) -> Result<LimitDecision> {
        let counts = match self.load_counts(ctx, key, windows).await {
            Ok(counts) => counts,
            // Failing open records nothing.
            Err(e) => {
                return self.on_failure(key, windows, LimiterError::store("failed to check rate limit", e))
            }
        };
        let decision = self.evaluate(key, windows, &counts, now);
        if !decision.allowed {
            return Ok(decision);
        }

        let mut primary_count = None;
        for (i, window) in windows.iter().enumerate() {
            match self.record_window(ctx, key, window, now).await {
                Ok(count) if i == 0 => primary_count = Some(count),
                Ok(_) => {}
                Err(e) => warn!(
                    key = %key,
                    window = %window.key,
                    error = %e,
                    "Failed to record request against window"
                ),
            }
        }

        Ok(LimitDecision {
            current_count: primary_count.unwrap_or(decision.current_count),
            ..decision
        })
    }

    /// Resolve `err` per the fail-open policy.
    fn on_failure(&self, key: &RateLimitKey, windows: &[TimeWindow], err: LimiterError) -> Result<LimitDecision> {
        if self.config.fail_open {
            warn!(key = %key, error = %err, "Store unavailable, failing open");
            return Ok(LimitDecision::fail_open(self.strategy.get_limit(key), windows[0].end));
        }
        Err(err)
    }

    async fn record_window(
        &self,
        ctx: &Context,
        key: &RateLimitKey,
        window: &TimeWindow,
        now: DateTime<Utc>,
    ) -> std::result::Result<u64, StoreError> {
        let update = CounterUpdate::increment(self.seed(key, window, now), now);
        ctx.run(self.store.increment(update)).await
    }

    async fn load_count(
        &self,
        ctx: &Context,
        key: &RateLimitKey,
        window: &TimeWindow,
    ) -> std::result::Result<u64, StoreError> {
        match ctx.run(self.store.get(&EntryKey::for_window(key, window))).await {
            Ok(entry) => Ok(entry.count),
            Err(StoreError::NotFound) => Ok(0),
            Err(e) => Err(e),
        }
    }

    async fn load_counts(
        &self,
        ctx: &Context,
        key: &RateLimitKey,
        windows: &[TimeWindow],
    ) -> std::result::Result<Vec<u64>, StoreError> {
        let mut counts = Vec::with_capacity(windows.len());
        for window in windows {
            counts.push(self.load_count(ctx, key, window).await?);
        }
        Ok(counts)
    }

    fn seed(&self, key: &RateLimitKey, window: &TimeWindow, now: DateTime<Utc>) -> RateLimitEntry {
        RateLimitEntry::new(
            key,
            window,
            self.strategy.window_type(),
            0,
            self.config.ttl_secs(),
            now,
        )
    }

    /// Full-jitter pause between create-race attempts.
    async fn backoff(&self) {
        let max = self.config.create_race_backoff_ms;
        if max == 0 {
            return;
        }
        let millis = rand::thread_rng().gen_range(0..=max);
        tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
    }
}

fn aligned_window(now: DateTime<Utc>, length: Duration) -> Result<TimeWindow> {
    align_window_start(now, length)
        .map(|start| TimeWindow::new(start, length))
        .ok_or_else(|| LimiterError::Internal("failed to align usage window".to_string()))
}
