//! Counter store backends.
//!
//! A store owns every [`CounterEntry`] and is the only shared mutable state
//! in the crate. All mutation goes through its atomic operations.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use super::entry::CounterEntry;
use crate::error::StoreError;

/// Closure applied by [`CounterStore::update`].
///
/// Receives the live entry (`None` when absent or expired) and returns the
/// entry to install.
pub type Mutator<'a> = dyn FnMut(Option<&CounterEntry>) -> CounterEntry + 'a;

/// Concurrency-safe key/value backend over counter entries.
pub trait CounterStore: Send + Sync + std::fmt::Debug {
    /// Get the live entry for `key`.
    ///
    /// Returns [`StoreError::NotFound`] when the key is absent or expired.
    fn get(&self, key: &str, now: DateTime<Utc>) -> Result<CounterEntry, StoreError>;

    /// Install `entry` unconditionally, expiring `ttl` after `now`.
    fn set(
        &self,
        key: &str,
        entry: CounterEntry,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Atomically create or bump the entry for `key`.
    ///
    /// An absent or expired entry is replaced by a fresh one with `count = 1`;
    /// otherwise `count` is incremented and `last_seen` refreshed.
    fn increment(
        &self,
        key: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<CounterEntry, StoreError>;

    /// Atomically read, modify and write the entry for `key`.
    fn update(
        &self,
        key: &str,
        now: DateTime<Utc>,
        apply: &mut Mutator<'_>,
    ) -> Result<CounterEntry, StoreError>;

    /// Remove the entry for `key`.
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Remove every entry.
    fn clear(&self) -> Result<(), StoreError>;

    /// Remove entries expired at `now`, returning how many were dropped.
    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Number of stored entries, expired or not.
    fn len(&self) -> usize;

    /// Whether the store holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory store backed by a sharded concurrent map.
///
/// Each key's mutation happens under its shard's write lock, so operations
/// on the same key are serialized while unrelated keys proceed in parallel.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, CounterEntry>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl CounterStore for MemoryStore {
    fn get(&self, key: &str, now: DateTime<Utc>) -> Result<CounterEntry, StoreError> {
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Ok(entry.clone()),
            _ => Err(StoreError::NotFound),
        }
    }

    fn set(
        &self,
        key: &str,
        mut entry: CounterEntry,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        entry.refresh_expiry(now, ttl);
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    fn increment(
        &self,
        key: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<CounterEntry, StoreError> {
        let snapshot = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_expired(now) {
                    debug!(key = %key, "Replacing expired counter entry");
                    *entry = CounterEntry::new(now, ttl);
                } else {
                    entry.count += 1;
                    entry.last_seen = now;
                }
                entry.clone()
            }
            Entry::Vacant(vacant) => {
                debug!(key = %key, "Creating counter entry");
                vacant.insert(CounterEntry::new(now, ttl)).clone()
            }
        };
        Ok(snapshot)
    }

    fn update(
        &self,
        key: &str,
        now: DateTime<Utc>,
        apply: &mut Mutator<'_>,
    ) -> Result<CounterEntry, StoreError> {
        let snapshot = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                let next = if entry.is_expired(now) {
                    apply(None)
                } else {
                    apply(Some(&*entry))
                };
                *entry = next;
                entry.clone()
            }
            Entry::Vacant(vacant) => vacant.insert(apply(None)).clone(),
        };
        Ok(snapshot)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.entries.clear();
        Ok(())
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before.saturating_sub(self.entries.len()))
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
