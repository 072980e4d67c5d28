//! Burst plus sustained limiting.

use tracing::debug;

use super::decision::{Decision, DenyReason};
use super::key::RequestContext;
use super::limiter::RateLimiter;

/// Two independent limiters applied in sequence.
///
/// The burst limiter (short window, small budget) caps spikes; the
/// sustained limiter (long window, larger budget) caps the rolling total.
/// The sustained limiter is only consulted when the burst check passes.
#[derive(Debug)]
pub struct BurstLimiter {
    burst: RateLimiter,
    sustained: RateLimiter,
}

impl BurstLimiter {
    /// Compose a burst limiter in front of a sustained limiter.
    pub fn new(burst: RateLimiter, sustained: RateLimiter) -> Self {
        Self { burst, sustained }
    }

    /// Check the request against both limiters.
    pub fn check(&self, ctx: &RequestContext) -> Decision {
        let burst = self.burst.check(ctx);
        if !burst.allowed {
            debug!(route = %ctx.route, "Burst limit exceeded");
            return burst.with_reason(DenyReason::Burst);
        }

        let sustained = self.sustained.check(ctx);
        if !sustained.allowed {
            debug!(route = %ctx.route, "Sustained limit exceeded");
            return sustained.with_reason(DenyReason::Sustained);
        }
        sustained
    }

    /// The short-window limiter.
    pub fn burst(&self) -> &RateLimiter {
        &self.burst
    }

    /// The long-window limiter.
    pub fn sustained(&self) -> &RateLimiter {
        &self.sustained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use std::sync::Arc;
    use std::time::Duration;

    fn composed(clock: &MockClock, burst: (u64, u64), sustained: (u64, u64)) -> BurstLimiter {
        let build = |max: u64, secs: u64, name: &str| {
            RateLimiter::builder()
                .name(name)
                .max_requests(max)
                .window(Duration::from_secs(secs))
                .clock(Arc::new(clock.clone()))
                .build()
                .unwrap()
        };
        BurstLimiter::new(
            build(burst.0, burst.1, "burst"),
            build(sustained.0, sustained.1, "sustained"),
        )
    }

    #[test]
    fn test_burst_denies_before_sustained() {
        let clock = MockClock::default();
        let limiter = composed(&clock, (2, 1), (100, 60));
        let ctx = RequestContext::new("10.0.0.1", "/api");

        assert!(limiter.check(&ctx).allowed);
        assert!(limiter.check(&ctx).allowed);

        let decision = limiter.check(&ctx);
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(DenyReason::Burst));
        assert_eq!(decision.limit, 2);

        // The denied request never reached the sustained limiter
        assert_eq!(limiter.sustained().entry("10.0.0.1").unwrap().count, 2);
    }

    #[test]
    fn test_allowed_decision_reports_sustained_budget() {
        let clock = MockClock::default();
        let limiter = composed(&clock, (2, 1), (100, 60));
        let ctx = RequestContext::new("10.0.0.1", "/api");

        let decision = limiter.check(&ctx);
        assert!(decision.allowed);
        assert_eq!(decision.limit, 100);
        assert_eq!(decision.remaining, 99);
    }

    #[test]
    fn test_sustained_limit_applies_after_bursts() {
        let clock = MockClock::default();
        let limiter = composed(&clock, (2, 1), (3, 60));
        let ctx = RequestContext::new("10.0.0.1", "/api");

        assert!(limiter.check(&ctx).allowed);
        assert!(limiter.check(&ctx).allowed);

        clock.advance(chrono::Duration::seconds(2));
        assert!(limiter.check(&ctx).allowed);

        let decision = limiter.check(&ctx);
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(DenyReason::Sustained));
    }
}
