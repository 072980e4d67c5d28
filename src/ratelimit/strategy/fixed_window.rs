//! Fixed window counter.
//!
//! The window starts at the first request for a key and the counter resets
//! once it expires. A burst straddling the boundary can admit up to twice the
//! budget in a short span; that is inherent to fixed windows.

use chrono::{DateTime, Utc};

use super::{remaining_from_count, Evaluation, Quota};
use crate::error::StoreError;
use crate::ratelimit::store::CounterStore;

pub(super) fn evaluate(
    store: &dyn CounterStore,
    key: &str,
    quota: &Quota,
    now: DateTime<Utc>,
) -> Result<Evaluation, StoreError> {
    let entry = store.increment(key, quota.window_delta(), now)?;

    Ok(Evaluation {
        allowed: entry.count <= quota.max_requests(),
        remaining: remaining_from_count(quota, entry.count),
        entry,
    })
}
