//! Leaky bucket, capacity-gated.
//!
//! `count` is the capacity in use; it drains at `max_requests / window` units
//! per second and each admitted request adds one unit. This is the mirror
//! image of the token bucket and produces the same admission curve. It is
//! not a serial-outflow queue: requests are admitted or rejected, never
//! delayed.

use chrono::{DateTime, Utc};

use super::{remaining_from_count, Evaluation, Quota};
use crate::error::StoreError;
use crate::ratelimit::entry::{elapsed_secs, CounterEntry};
use crate::ratelimit::store::CounterStore;

pub(super) fn evaluate(
    store: &dyn CounterStore,
    key: &str,
    quota: &Quota,
    now: DateTime<Utc>,
) -> Result<Evaluation, StoreError> {
    let window = quota.window_delta();
    let mut allowed = false;

    let entry = store.update(key, now, &mut |current| match current {
        Some(existing) => {
            let mut entry = existing.clone();
            drain(&mut entry, quota.rate_per_sec(), now);
            entry.last_seen = now;
            entry.refresh_expiry(now, window);

            allowed = entry.count < quota.max_requests();
            if allowed {
                entry.count += 1;
            }
            entry
        }
        None => {
            allowed = true;
            CounterEntry::new(now, window)
        }
    })?;

    Ok(Evaluation {
        allowed,
        remaining: remaining_from_count(quota, entry.count),
        entry,
    })
}

/// Remove whole units leaked since `last_refill`.
///
/// `last_refill` only advances by the time those units took to leak, so a
/// partial unit keeps accruing across frequent calls. An emptied bucket
/// does not bank leak for later.
fn drain(entry: &mut CounterEntry, rate: f64, now: DateTime<Utc>) {
    let leaked = (rate * elapsed_secs(entry.last_refill, now)).floor() as u64;
    if leaked == 0 {
        return;
    }

    if leaked >= entry.count {
        entry.count = 0;
        entry.last_refill = now;
    } else {
        entry.count -= leaked;
        let drained_nanos = (leaked as f64 / rate * 1e9).round() as i64;
        entry.last_refill += chrono::Duration::nanoseconds(drained_nanos);
    }
}
