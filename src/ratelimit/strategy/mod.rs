//! Throttling algorithms.
//!
//! Every algorithm evaluates one key against a [`Quota`] through a
//! [`CounterStore`] and reports whether the request is admitted together
//! with the entry snapshot it produced.

mod fixed_window;
mod leaky_bucket;
mod sliding_window;
mod token_bucket;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entry::CounterEntry;
use super::store::CounterStore;
use crate::error::{StoreError, WardenError};

/// A validated budget: `max_requests` per `window`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quota {
    max_requests: u64,
    window: Duration,
    window_delta: chrono::Duration,
}

impl Quota {
    /// Create a quota, rejecting a zero budget or an empty window.
    pub fn new(max_requests: u64, window: Duration) -> Result<Self, WardenError> {
        if max_requests == 0 {
            return Err(WardenError::ConfigInvalid(
                "max_requests must be greater than zero".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(WardenError::ConfigInvalid(
                "window duration must be greater than zero".to_string(),
            ));
        }
        let window_delta = chrono::Duration::from_std(window).map_err(|e| {
            WardenError::ConfigInvalid(format!("window duration out of range: {}", e))
        })?;

        Ok(Self {
            max_requests,
            window,
            window_delta,
        })
    }

    /// Maximum requests admitted per window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// Length of the window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Length of the window as a signed time delta.
    pub fn window_delta(&self) -> chrono::Duration {
        self.window_delta
    }

    /// Refill (or leak) rate in units per second.
    pub fn rate_per_sec(&self) -> f64 {
        self.max_requests as f64 / self.window.as_secs_f64()
    }
}

/// The outcome of running an algorithm for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Budget left after this request: whole tokens for the token bucket,
    /// `max_requests - count` for the other strategies
    pub remaining: u64,
    /// Snapshot of the entry after the update
    pub entry: CounterEntry,
}

/// The throttling algorithm a limiter runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Counter reset at fixed window boundaries
    #[default]
    FixedWindow,
    /// Counter decayed linearly across the window
    SlidingWindow,
    /// Tokens refilled continuously, one spent per request
    TokenBucket,
    /// Used capacity drained continuously, one added per request
    LeakyBucket,
}

impl Strategy {
    /// Evaluate `key` against `quota` at `now`.
    pub fn evaluate(
        &self,
        store: &dyn CounterStore,
        key: &str,
        quota: &Quota,
        now: DateTime<Utc>,
    ) -> Result<Evaluation, StoreError> {
        match self {
            Strategy::FixedWindow => fixed_window::evaluate(store, key, quota, now),
            Strategy::SlidingWindow => sliding_window::evaluate(store, key, quota, now),
            Strategy::TokenBucket => token_bucket::evaluate(store, key, quota, now),
            Strategy::LeakyBucket => leaky_bucket::evaluate(store, key, quota, now),
        }
    }

    /// The configuration name of this strategy.
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::FixedWindow => "fixed_window",
            Strategy::SlidingWindow => "sliding_window",
            Strategy::TokenBucket => "token_bucket",
            Strategy::LeakyBucket => "leaky_bucket",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed_window" => Ok(Strategy::FixedWindow),
            "sliding_window" => Ok(Strategy::SlidingWindow),
            "token_bucket" => Ok(Strategy::TokenBucket),
            "leaky_bucket" => Ok(Strategy::LeakyBucket),
            other => Err(WardenError::Config(format!("unknown strategy: {}", other))),
        }
    }
}

/// Budget left given a used count.
fn remaining_from_count(quota: &Quota, count: u64) -> u64 {
    quota.max_requests().saturating_sub(count)
}
