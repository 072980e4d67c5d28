//! Token bucket.
//!
//! The bucket holds up to `max_requests` tokens and refills continuously at
//! `max_requests / window` tokens per second. Each admitted request spends
//! one token.

use chrono::{DateTime, Utc};

use super::{Evaluation, Quota};
use crate::error::StoreError;
use crate::ratelimit::entry::{elapsed_secs, CounterEntry};
use crate::ratelimit::store::CounterStore;

pub(super) fn evaluate(
    store: &dyn CounterStore,
    key: &str,
    quota: &Quota,
    now: DateTime<Utc>,
) -> Result<Evaluation, StoreError> {
    let capacity = quota.max_requests() as f64;
    let rate = quota.rate_per_sec();
    let window = quota.window_delta();
    let mut allowed = false;

    let entry = store.update(key, now, &mut |current| match current {
        Some(existing) => {
            let mut entry = existing.clone();
            let refill = rate * elapsed_secs(entry.last_refill, now);
            entry.tokens = (entry.tokens + refill).min(capacity);
            entry.last_refill = now;
            entry.last_seen = now;
            entry.count += 1;
            entry.refresh_expiry(now, window);

            allowed = entry.tokens >= 1.0;
            if allowed {
                entry.tokens -= 1.0;
            }
            entry
        }
        None => {
            // The creating request spends the first token.
            let mut entry = CounterEntry::new(now, window);
            entry.tokens = capacity - 1.0;
            allowed = true;
            entry
        }
    })?;

    Ok(Evaluation {
        allowed,
        remaining: entry.tokens.floor().max(0.0) as u64,
        entry,
    })
}
