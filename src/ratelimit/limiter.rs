//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::decision::{Decision, DenyReason};
use super::entry::{expiry, CounterEntry};
use super::key::{by_address, KeyGenerator, RequestContext};
use super::store::{CounterStore, MemoryStore};
use super::strategy::{Quota, Strategy};
use crate::clock::{Clock, SystemClock};
use crate::error::{Result, StoreError, WardenError};

/// Predicate that exempts a request from limiting entirely.
pub type SkipPredicate = Arc<dyn Fn(&RequestContext) -> bool + Send + Sync>;

/// Callback invoked whenever a request is denied for exceeding the limit.
///
/// The callback observes the denial; it cannot change the returned decision.
pub type LimitReachedHandler = Arc<dyn Fn(&RequestContext, &Decision) + Send + Sync>;

/// What to do when the counter store cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Admit the request
    #[default]
    FailOpen,
    /// Reject the request
    FailClosed,
}

/// A single-strategy rate limiter.
///
/// This struct is thread-safe and can be shared across threads and tasks.
pub struct RateLimiter {
    /// Optional name used in logs
    name: Option<String>,
    strategy: Strategy,
    quota: Quota,
    key_generator: KeyGenerator,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    skip: Option<SkipPredicate>,
    on_limit_reached: Option<LimitReachedHandler>,
    failure_policy: FailurePolicy,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("strategy", &self.strategy)
            .field("quota", &self.quota)
            .field("store", &self.store)
            .field("failure_policy", &self.failure_policy)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Start building a rate limiter.
    pub fn builder() -> RateLimiterBuilder {
        RateLimiterBuilder::default()
    }

    /// Check whether the request described by `ctx` may proceed.
    ///
    /// A denial is returned as data; store failures are resolved by the
    /// configured [`FailurePolicy`].
    pub fn check(&self, ctx: &RequestContext) -> Decision {
        let now = self.clock.now();
        let limit = self.quota.max_requests();

        if let Some(skip) = &self.skip {
            if skip(ctx) {
                trace!(route = %ctx.route, "Skipping rate limit check");
                return Decision::allow(limit, limit, now);
            }
        }

        let key = (self.key_generator)(ctx);

        trace!(
            limiter = self.name.as_deref().unwrap_or("default"),
            key = %key,
            strategy = %self.strategy,
            "Checking rate limit"
        );

        match self.strategy.evaluate(self.store.as_ref(), &key, &self.quota, now) {
            Ok(eval) if eval.allowed => {
                Decision::allow(limit, eval.remaining, eval.entry.expires_at)
            }
            Ok(eval) => {
                debug!(
                    limiter = self.name.as_deref().unwrap_or("default"),
                    key = %key,
                    count = eval.entry.count,
                    limit = limit,
                    "Rate limit exceeded"
                );
                let decision = Decision::deny(
                    limit,
                    eval.remaining,
                    eval.entry.expires_at,
                    DenyReason::LimitExceeded,
                );
                if let Some(handler) = &self.on_limit_reached {
                    handler(ctx, &decision);
                }
                decision
            }
            Err(StoreError::NotFound) => {
                // A backend that lost the entry mid-operation; start a fresh window.
                debug!(key = %key, "Counter entry missing, treating as a new window");
                Decision::allow(
                    limit,
                    limit.saturating_sub(1),
                    expiry(now, self.quota.window_delta()),
                )
            }
            Err(e) => {
                warn!(
                    limiter = self.name.as_deref().unwrap_or("default"),
                    key = %key,
                    error = %e,
                    policy = ?self.failure_policy,
                    "Counter store failed"
                );
                match self.failure_policy {
                    FailurePolicy::FailOpen => Decision::allow(limit, limit, now),
                    FailurePolicy::FailClosed => Decision::deny(
                        limit,
                        0,
                        expiry(now, self.quota.window_delta()),
                        DenyReason::StoreUnavailable,
                    ),
                }
            }
        }
    }

    /// Get the live counter entry for a key.
    ///
    /// Returns `None` if no unexpired entry exists.
    pub fn entry(&self, key: &str) -> Option<CounterEntry> {
        self.store.get(key, self.clock.now()).ok()
    }

    /// Forget the state for a key.
    pub fn reset(&self, key: &str) -> Result<()> {
        self.store.delete(key)?;
        Ok(())
    }

    /// The limiter's name, if one was configured.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The algorithm this limiter runs.
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// The budget this limiter enforces.
    pub fn quota(&self) -> &Quota {
        &self.quota
    }

    /// The backing counter store.
    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// The clock used for window arithmetic.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

/// Builder for [`RateLimiter`].
///
/// `max_requests` and `window` are required; everything else has a default.
pub struct RateLimiterBuilder {
    name: Option<String>,
    strategy: Strategy,
    max_requests: Option<u64>,
    window: Option<Duration>,
    key_generator: KeyGenerator,
    store: Option<Arc<dyn CounterStore>>,
    clock: Arc<dyn Clock>,
    skip: Option<SkipPredicate>,
    on_limit_reached: Option<LimitReachedHandler>,
    failure_policy: FailurePolicy,
}

impl Default for RateLimiterBuilder {
    fn default() -> Self {
        Self {
            name: None,
            strategy: Strategy::default(),
            max_requests: None,
            window: None,
            key_generator: by_address(),
            store: None,
            clock: Arc::new(SystemClock::new()),
            skip: None,
            on_limit_reached: None,
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl RateLimiterBuilder {
    /// Name the limiter for logging.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Select the throttling algorithm.
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the budget per window.
    pub fn max_requests(mut self, max_requests: u64) -> Self {
        self.max_requests = Some(max_requests);
        self
    }

    /// Set the window length.
    pub fn window(mut self, window: Duration) -> Self {
        self.window = Some(window);
        self
    }

    /// Set how partition keys are derived.
    pub fn key_generator(mut self, key_generator: KeyGenerator) -> Self {
        self.key_generator = key_generator;
        self
    }

    /// Use a specific counter store instead of a private in-memory one.
    pub fn store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a specific clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Exempt requests for which `skip` returns true.
    pub fn skip_if(
        mut self,
        skip: impl Fn(&RequestContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.skip = Some(Arc::new(skip));
        self
    }

    /// Invoke `handler` whenever a request is denied for exceeding the limit.
    ///
    /// Notification only: the denial is returned to the caller unchanged.
    pub fn on_limit_reached(
        mut self,
        handler: impl Fn(&RequestContext, &Decision) + Send + Sync + 'static,
    ) -> Self {
        self.on_limit_reached = Some(Arc::new(handler));
        self
    }

    /// Choose between failing open and failing closed on store errors.
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Validate the configuration and build the limiter.
    pub fn build(self) -> Result<RateLimiter> {
        let max_requests = self
            .max_requests
            .ok_or_else(|| WardenError::ConfigInvalid("max_requests is required".to_string()))?;
        let window = self
            .window
            .ok_or_else(|| WardenError::ConfigInvalid("window is required".to_string()))?;
        let quota = Quota::new(max_requests, window)?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn CounterStore>);

        debug!(
            name = ?self.name,
            strategy = %self.strategy,
            max_requests,
            window_ms = window.as_millis() as u64,
            "Rate limiter built"
        );

        Ok(RateLimiter {
            name: self.name,
            strategy: self.strategy,
            quota,
            key_generator: self.key_generator,
            store,
            clock: self.clock,
            skip: self.skip,
            on_limit_reached: self.on_limit_reached,
            failure_policy: self.failure_policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::ratelimit::key::by_route;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A store whose backend is permanently down.
    #[derive(Debug)]
    struct UnavailableStore;

    impl CounterStore for UnavailableStore {
        fn get(
            &self,
            _: &str,
            _: chrono::DateTime<chrono::Utc>,
        ) -> std::result::Result<CounterEntry, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        fn set(
            &self,
            _: &str,
            _: CounterEntry,
            _: chrono::Duration,
            _: chrono::DateTime<chrono::Utc>,
        ) -> std::result::Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        fn increment(
            &self,
            _: &str,
            _: chrono::Duration,
            _: chrono::DateTime<chrono::Utc>,
        ) -> std::result::Result<CounterEntry, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        fn update(
            &self,
            _: &str,
            _: chrono::DateTime<chrono::Utc>,
            _: &mut crate::ratelimit::store::Mutator<'_>,
        ) -> std::result::Result<CounterEntry, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        fn delete(&self, _: &str) -> std::result::Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        fn clear(&self) -> std::result::Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        fn purge_expired(
            &self,
            _: chrono::DateTime<chrono::Utc>,
        ) -> std::result::Result<usize, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        fn len(&self) -> usize {
            0
        }
    }

    /// A store that loses every entry between the lookup and the write.
    #[derive(Debug)]
    struct VanishingStore;

    impl CounterStore for VanishingStore {
        fn get(
            &self,
            _: &str,
            _: chrono::DateTime<chrono::Utc>,
        ) -> std::result::Result<CounterEntry, StoreError> {
            Err(StoreError::NotFound)
        }

        fn set(
            &self,
            _: &str,
            _: CounterEntry,
            _: chrono::Duration,
            _: chrono::DateTime<chrono::Utc>,
        ) -> std::result::Result<(), StoreError> {
            Ok(())
        }

        fn increment(
            &self,
            _: &str,
            _: chrono::Duration,
            _: chrono::DateTime<chrono::Utc>,
        ) -> std::result::Result<CounterEntry, StoreError> {
            Err(StoreError::NotFound)
        }

        fn update(
            &self,
            _: &str,
            _: chrono::DateTime<chrono::Utc>,
            _: &mut crate::ratelimit::store::Mutator<'_>,
        ) -> std::result::Result<CounterEntry, StoreError> {
            Err(StoreError::NotFound)
        }

        fn delete(&self, _: &str) -> std::result::Result<(), StoreError> {
            Ok(())
        }

        fn clear(&self) -> std::result::Result<(), StoreError> {
            Ok(())
        }

        fn purge_expired(
            &self,
            _: chrono::DateTime<chrono::Utc>,
        ) -> std::result::Result<usize, StoreError> {
            Ok(0)
        }

        fn len(&self) -> usize {
            0
        }
    }

    fn ctx(address: &str) -> RequestContext {
        RequestContext::new(address, "/api")
    }

    fn limiter(max: u64, window: Duration, clock: &MockClock) -> RateLimiter {
        RateLimiter::builder()
            .max_requests(max)
            .window(window)
            .clock(Arc::new(clock.clone()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_missing_budget_rejected() {
        let err = RateLimiter::builder()
            .window(Duration::from_secs(1))
            .build()
            .unwrap_err();
        assert!(matches!(err, WardenError::ConfigInvalid(_)));
    }

    #[test]
    fn test_zero_budget_rejected() {
        let err = RateLimiter::builder()
            .max_requests(0)
            .window(Duration::from_secs(1))
            .build()
            .unwrap_err();
        assert!(matches!(err, WardenError::ConfigInvalid(_)));
    }

    #[test]
    fn test_zero_window_rejected() {
        let err = RateLimiter::builder()
            .max_requests(10)
            .window(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, WardenError::ConfigInvalid(_)));
    }

    #[test]
    fn test_fixed_window_check() {
        let clock = MockClock::default();
        let limiter = limiter(3, Duration::from_secs(1), &clock);
        let start = clock.now();

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check(&ctx("10.0.0.1"));
            assert!(decision.allowed);
            assert_eq!(decision.limit, 3);
            assert_eq!(decision.remaining, expected_remaining);
            assert_eq!(decision.reset_at, start + chrono::Duration::seconds(1));
        }

        let decision = limiter.check(&ctx("10.0.0.1"));
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(DenyReason::LimitExceeded));

        clock.advance(chrono::Duration::milliseconds(1001));
        let decision = limiter.check(&ctx("10.0.0.1"));
        assert!(decision.allowed);
        assert_eq!(limiter.entry("10.0.0.1").unwrap().count, 1);
    }

    #[test]
    fn test_keys_have_separate_budgets() {
        let clock = MockClock::default();
        let limiter = limiter(1, Duration::from_secs(60), &clock);

        assert!(limiter.check(&ctx("10.0.0.1")).allowed);
        assert!(limiter.check(&ctx("10.0.0.2")).allowed);
        assert!(!limiter.check(&ctx("10.0.0.1")).allowed);
    }

    #[test]
    fn test_custom_key_generator() {
        let limiter = RateLimiter::builder()
            .max_requests(1)
            .window(Duration::from_secs(60))
            .key_generator(by_route())
            .build()
            .unwrap();

        assert!(limiter.check(&RequestContext::new("10.0.0.1", "/a")).allowed);
        // Same route from another caller shares the budget
        assert!(!limiter.check(&RequestContext::new("10.0.0.2", "/a")).allowed);
        assert!(limiter.entry("/a").is_some());
    }

    #[test]
    fn test_skip_predicate_bypasses_store() {
        let limiter = RateLimiter::builder()
            .max_requests(1)
            .window(Duration::from_secs(60))
            .skip_if(|ctx| ctx.route == "/health")
            .build()
            .unwrap();

        let health = RequestContext::new("10.0.0.1", "/health");
        for _ in 0..5 {
            let decision = limiter.check(&health);
            assert!(decision.allowed);
            assert_eq!(decision.remaining, 1);
        }
        assert!(limiter.store().is_empty());
    }

    #[test]
    fn test_on_limit_reached_called_on_denial() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let limiter = RateLimiter::builder()
            .max_requests(1)
            .window(Duration::from_secs(60))
            .on_limit_reached(move |_, decision| {
                assert!(!decision.allowed);
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        limiter.check(&ctx("10.0.0.1"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        limiter.check(&ctx("10.0.0.1"));
        limiter.check(&ctx("10.0.0.1"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_store_failure_fails_open_by_default() {
        let limiter = RateLimiter::builder()
            .max_requests(5)
            .window(Duration::from_secs(1))
            .store(Arc::new(UnavailableStore))
            .build()
            .unwrap();

        let decision = limiter.check(&ctx("10.0.0.1"));
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 5);
        assert_eq!(decision.reason, None);
    }

    #[test]
    fn test_store_failure_fails_closed_when_configured() {
        let clock = MockClock::default();
        let limiter = RateLimiter::builder()
            .max_requests(5)
            .window(Duration::from_secs(1))
            .store(Arc::new(UnavailableStore))
            .clock(Arc::new(clock.clone()))
            .failure_policy(FailurePolicy::FailClosed)
            .build()
            .unwrap();

        let decision = limiter.check(&ctx("10.0.0.1"));
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(DenyReason::StoreUnavailable));
        assert_eq!(decision.reset_at, clock.now() + chrono::Duration::seconds(1));
    }

    #[test]
    fn test_missing_entry_starts_fresh_window() {
        let clock = MockClock::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();

        for strategy in [
            Strategy::FixedWindow,
            Strategy::SlidingWindow,
            Strategy::TokenBucket,
            Strategy::LeakyBucket,
        ] {
            let seen = seen.clone();
            let limiter = RateLimiter::builder()
                .strategy(strategy)
                .max_requests(5)
                .window(Duration::from_secs(10))
                .store(Arc::new(VanishingStore))
                .clock(Arc::new(clock.clone()))
                .failure_policy(FailurePolicy::FailClosed)
                .on_limit_reached(move |_, _| {
                    seen.fetch_add(1, Ordering::SeqCst);
                })
                .build()
                .unwrap();

            let decision = limiter.check(&ctx("10.0.0.1"));
            assert!(decision.allowed, "{strategy} denied a missing entry");
            assert_eq!(decision.limit, 5);
            assert_eq!(decision.remaining, 4);
            assert_eq!(decision.reset_at, clock.now() + chrono::Duration::seconds(10));
            assert_eq!(decision.reason, None);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_on_limit_reached_cannot_change_decision() {
        let limiter = RateLimiter::builder()
            .max_requests(1)
            .window(Duration::from_secs(60))
            .on_limit_reached(|_, _| {})
            .build()
            .unwrap();

        limiter.check(&ctx("10.0.0.1"));
        let decision = limiter.check(&ctx("10.0.0.1"));
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.reason, Some(DenyReason::LimitExceeded));
    }

    #[test]
    fn test_reset_forgets_key() {
        let clock = MockClock::default();
        let limiter = limiter(1, Duration::from_secs(60), &clock);

        limiter.check(&ctx("10.0.0.1"));
        assert!(!limiter.check(&ctx("10.0.0.1")).allowed);

        limiter.reset("10.0.0.1").unwrap();
        assert!(limiter.check(&ctx("10.0.0.1")).allowed);
    }

    #[test]
    fn test_token_bucket_remaining_tracks_tokens() {
        let clock = MockClock::default();
        let limiter = RateLimiter::builder()
            .strategy(Strategy::TokenBucket)
            .max_requests(5)
            .window(Duration::from_secs(5))
            .clock(Arc::new(clock.clone()))
            .build()
            .unwrap();

        assert_eq!(limiter.check(&ctx("a")).remaining, 4);
        assert_eq!(limiter.check(&ctx("a")).remaining, 3);
        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(limiter.check(&ctx("a")).remaining, 3);
    }

    #[test]
    fn test_shared_limiter_across_threads() {
        let limiter = Arc::new(
            RateLimiter::builder()
                .max_requests(500)
                .window(Duration::from_secs(60))
                .build()
                .unwrap(),
        );
        let admitted = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|scope| {
            for _ in 0..100 {
                let limiter = limiter.clone();
                let admitted = admitted.clone();
                scope.spawn(move || {
                    for _ in 0..10 {
                        if limiter.check(&ctx("10.0.0.1")).allowed {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::SeqCst), 500);
        assert_eq!(limiter.entry("10.0.0.1").unwrap().count, 1000);
    }
}
