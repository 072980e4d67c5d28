//! Rate limiting algorithms, state and composition.

mod admission;
mod burst;
mod decision;
mod entry;
mod limiter;
mod store;
mod strategy;
mod sweeper;

pub mod key;

pub use admission::Admission;
pub use burst::BurstLimiter;
pub use decision::{
    Decision, DenyReason, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET, HEADER_RETRY_AFTER,
};
pub use entry::CounterEntry;
pub use key::{KeyGenerator, KeySource, RequestContext};
pub use limiter::{
    FailurePolicy, LimitReachedHandler, RateLimiter, RateLimiterBuilder, SkipPredicate,
};
pub use store::{CounterStore, MemoryStore, Mutator};
pub use strategy::{Evaluation, Quota, Strategy};
pub use sweeper::{Sweeper, SweeperHandle, MIN_SWEEP_INTERVAL};
