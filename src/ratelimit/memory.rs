//! In-process store with the same conditional-write semantics as a shared one.
//!
//! Useful for tests, demos and single-node deployments. All operations
//! serialize on one lock, which makes transactions trivially atomic.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::trace;

use super::backend::{CounterUpdate, TransactionalStore, WindowStore};
use super::counter::{EntryKey, RateLimitEntry};
use crate::error::StoreError;

/// Map-backed [`WindowStore`].
#[derive(Debug, Clone)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<EntryKey, RateLimitEntry>>>,
    transactions: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// A store that supports multi-item transactions.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            transactions: true,
        }
    }

    /// A store without the transactional capability.
    pub fn without_transactions() -> Self {
        Self {
            transactions: false,
            ..Self::new()
        }
    }

    /// Insert or overwrite an entry.
    pub fn put(&self, entry: RateLimitEntry) {
        self.entries.lock().insert(entry.key(), entry);
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Drop entries whose TTL has passed, returning how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Snapshot of every entry, ordered by key.
    pub fn entries(&self) -> Vec<RateLimitEntry> {
        let mut snapshot: Vec<_> = self.entries.lock().values().cloned().collect();
        snapshot.sort_by(|a, b| (&a.pk, &a.sk).cmp(&(&b.pk, &b.sk)));
        snapshot
    }
}

/// The entry that results from applying `update` on top of `current`.
fn apply(current: Option<&RateLimitEntry>, update: &CounterUpdate) -> Result<RateLimitEntry, StoreError> {
    if let Some(condition) = update.condition {
        if !condition.holds(current.map(|entry| entry.count)) {
            return Err(StoreError::ConditionFailed);
        }
    }

    let mut next = match current {
        Some(entry) => {
            let mut entry = entry.clone();
            entry.count = entry.count.saturating_add(update.delta);
            entry
        }
        None => {
            let mut entry = update.seed.clone();
            entry.count = update.delta;
            entry
        }
    };
    next.updated_at = update.updated_at;
    Ok(next)
}

#[async_trait]
impl WindowStore for MemoryStore {
    async fn get(&self, key: &EntryKey) -> Result<RateLimitEntry, StoreError> {
        self.entries
            .lock()
            .get(key)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn increment(&self, update: CounterUpdate) -> Result<u64, StoreError> {
        let key = update.key();
        let mut entries = self.entries.lock();
        let next = apply(entries.get(&key), &update)?;
        let count = next.count;
        entries.insert(key, next);
        Ok(count)
    }

    async fn create_if_not_exists(&self, entry: RateLimitEntry) -> Result<(), StoreError> {
        let key = entry.key();
        let mut entries = self.entries.lock();
        if entries.contains_key(&key) {
            return Err(StoreError::ConditionFailed);
        }
        entries.insert(key, entry);
        Ok(())
    }

    fn transactional(&self) -> Option<&dyn TransactionalStore> {
        if self.transactions {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl TransactionalStore for MemoryStore {
    async fn transact_write(&self, updates: Vec<CounterUpdate>) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        let mut staged: HashMap<EntryKey, RateLimitEntry> = HashMap::new();

        for update in &updates {
            let key = update.key();
            let current = staged.get(&key).or_else(|| entries.get(&key));
            let next = apply(current, update)?;
            staged.insert(key, next);
        }

        trace!(items = staged.len(), "Committing transaction");
        entries.extend(staged);
        Ok(())
    }
}
