//! Approximate sliding window.
//!
//! Instead of keeping a log of request timestamps, the stored count is
//! decayed linearly by the fraction of the window that has elapsed since it
//! opened. This under-counts compared to an exact sliding log; a precise
//! variant would sum N sub-window buckets over the trailing period.

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

    let entry = store.update(key, now, &mut |current| match current {
        Some(existing) if now - existing.first_seen < window => decay(existing, quota, now),
        _ => CounterEntry::new(now, window),
    })?;

    Ok(Evaluation {
        allowed: entry.count <= quota.max_requests(),
        remaining: remaining_from_count(quota, entry.count),
        entry,
    })
}

/// `count = floor(count * (1 - elapsed / window)) + 1`
fn decay(existing: &CounterEntry, quota: &Quota, now: DateTime<Utc>) -> CounterEntry {
    let ratio = elapsed_secs(existing.first_seen, now) / quota.window().as_secs_f64();
    let kept = (existing.count as f64 * (1.0 - ratio)).floor().max(0.0) as u64;

    CounterEntry {
        count: kept + 1,
        last_seen: now,
        ..existing.clone()
    }
}
