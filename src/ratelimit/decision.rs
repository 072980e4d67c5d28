//! Admission verdicts and their protocol-level rendering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Header carrying the budget per window.
pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
/// Header carrying the budget left in the current window.
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
/// Header carrying the reset time as epoch seconds.
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
/// Header carrying seconds to wait, only sent on rejection.
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// The limiter's budget is exhausted
    LimitExceeded,
    /// The short-window burst budget of a composed limiter is exhausted
    Burst,
    /// The long-window sustained budget of a composed limiter is exhausted
    Sustained,
    /// The counter store failed and the limiter fails closed
    StoreUnavailable,
}

/// The result of one admission check.
///
/// A denial is ordinary data; it is up to the serving layer to turn it into
/// a "too many requests" response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests allowed per window
    pub limit: u64,
    /// Budget left after this request
    pub remaining: u64,
    /// When the current window or bucket state expires
    pub reset_at: DateTime<Utc>,
    /// Set when the request is denied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenyReason>,
}

impl Decision {
    /// An admitted request.
    pub fn allow(limit: u64, remaining: u64, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_at,
            reason: None,
        }
    }

    /// A denied request.
    pub fn deny(limit: u64, remaining: u64, reset_at: DateTime<Utc>, reason: DenyReason) -> Self {
        Self {
            allowed: false,
            limit,
            remaining,
            reset_at,
            reason: Some(reason),
        }
    }

    /// Re-tag a denial with a different reason.
    pub fn with_reason(mut self, reason: DenyReason) -> Self {
        if !self.allowed {
            self.reason = Some(reason);
        }
        self
    }

    /// Whole seconds from `now` until `reset_at`, rounded up.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_at - now).num_milliseconds();
        if millis <= 0 {
            0
        } else {
            (millis as u64).div_ceil(1000)
        }
    }

    /// Rate limit headers for this decision.
    ///
    /// `Retry-After` is only present when the request is denied.
    pub fn headers(&self, now: DateTime<Utc>) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            (HEADER_LIMIT, self.limit.to_string()),
            (HEADER_REMAINING, self.remaining.to_string()),
            (HEADER_RESET, self.reset_at.timestamp().to_string()),
        ];
        if !self.allowed {
            headers.push((HEADER_RETRY_AFTER, self.retry_after_secs(now).to_string()));
        }
        headers
    }
}
