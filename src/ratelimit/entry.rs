//! Per-key counter state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Mutable rate limit state for one partition key.
///
/// Entries are owned by a [`CounterStore`](super::store::CounterStore);
/// callers only ever see clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterEntry {
    /// Requests counted in the current window, or used capacity for the leaky bucket
    pub count: u64,
    /// Start of the current window
    pub first_seen: DateTime<Utc>,
    /// Most recent access
    pub last_seen: DateTime<Utc>,
    /// Point after which the entry is treated as absent
    pub expires_at: DateTime<Utc>,
    /// Token accumulator (token bucket only)
    pub tokens: f64,
    /// Last token refill or leak recalculation
    pub last_refill: DateTime<Utc>,
}

impl CounterEntry {
    /// Create a fresh entry with `count = 1` created at `now`.
    pub fn new(now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            count: 1,
            first_seen: now,
            last_seen: now,
            expires_at: expiry(now, ttl),
            tokens: 0.0,
            last_refill: now,
        }
    }

    /// Whether the entry is logically stale at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Push the expiry out to `now + ttl`.
    pub fn refresh_expiry(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.expires_at = expiry(now, ttl);
    }
}

/// Compute `now + ttl`, saturating instead of overflowing.
pub(crate) fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Seconds elapsed from `earlier` to `later`, clamped at zero.
pub(crate) fn elapsed_secs(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier)
        .to_std()
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
