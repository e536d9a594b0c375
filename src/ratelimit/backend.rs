//! Store traits for the durable, shared counters behind the limiter.
//!
//! The limiter holds no locks of its own; every race is settled by the
//! store's conditional writes. [`WindowStore`] is the base capability every
//! adapter provides. Adapters that can commit several writes atomically also
//! implement [`TransactionalStore`] and advertise it through
//! [`WindowStore::transactional`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::counter::{EntryKey, RateLimitEntry};
use crate::error::StoreError;

/// Server-side predicate guarding a counter update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// The entry exists and its count is below the bound.
    CountBelow(u64),
    /// A missing entry counts as zero; the (possibly zero) count is below the bound.
    AbsentOrCountBelow(u64),
}

impl Condition {
    /// Evaluate the predicate against the stored count, `None` if absent.
    pub fn holds(&self, current: Option<u64>) -> bool {
        match (self, current) {
            (Condition::CountBelow(bound), Some(count)) => count < *bound,
            (Condition::CountBelow(_), None) => false,
            (Condition::AbsentOrCountBelow(bound), count) => count.unwrap_or(0) < *bound,
        }
    }
}

/// An increment of one counter.
///
/// If the counter is absent and the condition allows the write, the store
/// creates it from `seed` with `count = delta`. Otherwise only `count` and
/// `updated_at` change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterUpdate {
    pub seed: RateLimitEntry,
    pub delta: u64,
    pub condition: Option<Condition>,
    pub updated_at: DateTime<Utc>,
}

impl CounterUpdate {
    /// Unconditional increment by one.
    pub fn increment(seed: RateLimitEntry, updated_at: DateTime<Utc>) -> Self {
        Self {
            seed,
            delta: 1,
            condition: None,
            updated_at,
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn key(&self) -> EntryKey {
        self.seed.key()
    }
}

/// Base store capability: point reads, conditional increments and create-if-absent.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Fetch an entry; [`StoreError::NotFound`] if it does not exist.
    async fn get(&self, key: &EntryKey) -> Result<RateLimitEntry, StoreError>;

    /// Apply `update` and return the post-increment count.
    ///
    /// Fails with [`StoreError::ConditionFailed`] when the condition does not hold.
    async fn increment(&self, update: CounterUpdate) -> Result<u64, StoreError>;

    /// Insert `entry` unless an entry with the same key exists, in which case
    /// fail with [`StoreError::ConditionFailed`].
    async fn create_if_not_exists(&self, entry: RateLimitEntry) -> Result<(), StoreError>;

    /// The multi-item transactional capability, when the adapter has one.
    fn transactional(&self) -> Option<&dyn TransactionalStore> {
        None
    }
}

/// Optional capability: commit several counter updates all-or-nothing.
#[async_trait]
pub trait TransactionalStore: Send + Sync {
    /// Apply every update or none. Any failing condition aborts the whole
    /// transaction with [`StoreError::ConditionFailed`].
    async fn transact_write(&self, updates: Vec<CounterUpdate>) -> Result<(), StoreError>;
}
