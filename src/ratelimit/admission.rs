//! The single call the serving layer makes.

use super::burst::BurstLimiter;
use super::decision::Decision;
use super::key::RequestContext;
use super::limiter::RateLimiter;

/// Trait for admission gates.
///
/// This trait abstracts over a plain [`RateLimiter`] and a composed
/// [`BurstLimiter`] so the serving layer can work with either.
pub trait Admission: Send + Sync {
    /// Decide whether the request described by `ctx` may proceed.
    fn check(&self, ctx: &RequestContext) -> Decision;
}

impl Admission for RateLimiter {
    fn check(&self, ctx: &RequestContext) -> Decision {
        RateLimiter::check(self, ctx)
    }
}

impl Admission for BurstLimiter {
    fn check(&self, ctx: &RequestContext) -> Decision {
        BurstLimiter::check(self, ctx)
    }
}
