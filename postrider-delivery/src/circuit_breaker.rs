//! Per-sender-domain circuit breaker.
//!
//! Admission control is keyed by the *sending* domain, not the recipient's:
//! the breaker throttles a sending identity whose traffic keeps failing,
//! wherever those failures land. Breakers are created on first use and never
//! destroyed.
//!
//! The policy is a three-state machine:
//!
//! - **Closed**: calls flow through. Outcomes accumulate in a window that
//!   resets once `interval_secs` elapses; when the window holds at least
//!   `minimum_calls` calls and the failure ratio reaches `failure_ratio`,
//!   the breaker trips.
//! - **Open**: calls are rejected without running. After `open_timeout_secs`
//!   the next call transitions to half-open.
//! - **Half-open**: at most `half_open_calls` trial calls are admitted. Any
//!   failure re-opens (and restarts the timer); `half_open_calls` successes
//!   close the breaker with fresh counts.

use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use parking_lot::Mutex;
use postrider_common::Domain;
use serde::Deserialize;

use crate::error::{DeliveryError, DispatchError};

/// Breaker policy knobs, shared by every domain.
#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    /// Length of the closed-state counting window in seconds.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// How long an open breaker rejects before allowing trial calls.
    #[serde(default = "default_open_timeout_secs")]
    pub open_timeout_secs: u64,

    /// Minimum calls in the window before the failure ratio is consulted.
    #[serde(default = "default_minimum_calls")]
    pub minimum_calls: u32,

    /// Failure ratio at or above which the breaker trips.
    #[serde(default = "default_failure_ratio")]
    pub failure_ratio: f64,

    /// Trial calls admitted while half-open; also the number of consecutive
    /// successes required to close.
    #[serde(default = "default_half_open_calls")]
    pub half_open_calls: u32,
}

const fn default_interval_secs() -> u64 {
    60
}

const fn default_open_timeout_secs() -> u64 {
    30
}

const fn default_minimum_calls() -> u32 {
    3
}

const fn default_failure_ratio() -> f64 {
    0.6
}

const fn default_half_open_calls() -> u32 {
    3
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            open_timeout_secs: default_open_timeout_secs(),
            minimum_calls: default_minimum_calls(),
            failure_ratio: default_failure_ratio(),
            half_open_calls: default_half_open_calls(),
        }
    }
}

/// The mode a breaker is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Mutable per-domain breaker data. Guarded by a per-domain mutex so
/// unrelated domains never contend.
#[derive(Debug)]
struct Breaker {
    state: BreakerState,
    calls: u32,
    failures: u32,
    window_started: Instant,
    opened_at: Option<Instant>,
    trials_admitted: u32,
    trial_successes: u32,
}

impl Breaker {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            calls: 0,
            failures: 0,
            window_started: Instant::now(),
            opened_at: None,
            trials_admitted: 0,
            trial_successes: 0,
        }
    }

    /// Decide whether a call may proceed, performing the open → half-open
    /// transition when the timeout has elapsed.
    fn try_admit(&mut self, config: &BreakerConfig) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let expired = self.opened_at.is_some_and(|at| {
                    at.elapsed() >= Duration::from_secs(config.open_timeout_secs)
                });
                if expired {
                    self.state = BreakerState::HalfOpen;
                    self.opened_at = None;
                    self.trials_admitted = 1;
                    self.trial_successes = 0;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if self.trials_admitted < config.half_open_calls {
                    self.trials_admitted += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn roll_window(&mut self, config: &BreakerConfig) {
        if self.window_started.elapsed() >= Duration::from_secs(config.interval_secs) {
            self.calls = 0;
            self.failures = 0;
            self.window_started = Instant::now();
        }
    }

    fn record_success(&mut self, config: &BreakerConfig) {
        match self.state {
            BreakerState::Closed => {
                self.roll_window(config);
                self.calls += 1;
            }
            BreakerState::HalfOpen => {
                self.trial_successes += 1;
                if self.trial_successes >= config.half_open_calls {
                    self.reset();
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failed call. Returns `true` if this failure tripped the
    /// breaker.
    fn record_failure(&mut self, config: &BreakerConfig) -> bool {
        match self.state {
            BreakerState::Closed => {
                self.roll_window(config);
                self.calls += 1;
                self.failures += 1;
                let ratio = f64::from(self.failures) / f64::from(self.calls);
                if self.calls >= config.minimum_calls && ratio >= config.failure_ratio {
                    self.trip();
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                self.trip();
                true
            }
            BreakerState::Open => false,
        }
    }

    fn trip(&mut self) {
        self.state = BreakerState::Open;
        self.opened_at = Some(Instant::now());
        self.calls = 0;
        self.failures = 0;
        self.trials_admitted = 0;
        self.trial_successes = 0;
    }

    fn reset(&mut self) {
        self.state = BreakerState::Closed;
        self.calls = 0;
        self.failures = 0;
        self.window_started = Instant::now();
        self.opened_at = None;
        self.trials_admitted = 0;
        self.trial_successes = 0;
    }
}

/// Registry of per-domain breakers.
pub struct CircuitBreaker {
    config: BreakerConfig,
    breakers: DashMap<Domain, Arc<Mutex<Breaker>>>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Run `operation` under the breaker for `domain`.
    ///
    /// If the breaker rejects the call, the operation is never constructed
    /// into a running future and `CircuitOpen` is returned. Otherwise the
    /// outcome is recorded and propagated.
    ///
    /// # Errors
    ///
    /// `DispatchError::CircuitOpen` on rejection, or the operation's own
    /// error wrapped in `DispatchError::Delivery`.
    pub async fn execute<T, F, Fut>(
        &self,
        domain: &Domain,
        operation: F,
    ) -> Result<T, DispatchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DeliveryError>>,
    {
        let breaker = self.breaker(domain);

        if !breaker.lock().try_admit(&self.config) {
            tracing::debug!(%domain, "circuit open, rejecting dispatch");
            return Err(DispatchError::CircuitOpen(domain.clone()));
        }

        match operation().await {
            Ok(value) => {
                breaker.lock().record_success(&self.config);
                Ok(value)
            }
            Err(err) => {
                if breaker.lock().record_failure(&self.config) {
                    tracing::warn!(%domain, "circuit opened");
                }
                Err(DispatchError::Delivery(err))
            }
        }
    }

    /// Current state for `domain`; `Closed` if no breaker exists yet.
    #[must_use]
    pub fn state(&self, domain: &Domain) -> BreakerState {
        self.breakers
            .get(domain)
            .map_or(BreakerState::Closed, |breaker| breaker.lock().state)
    }

    /// Failures recorded in the current closed-state window.
    #[must_use]
    pub fn failure_count(&self, domain: &Domain) -> u32 {
        self.breakers
            .get(domain)
            .map_or(0, |breaker| breaker.lock().failures)
    }

    fn breaker(&self, domain: &Domain) -> Arc<Mutex<Breaker>> {
        self.breakers
            .entry(domain.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Breaker::new())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn config() -> BreakerConfig {
        BreakerConfig::default()
    }

    async fn fail(registry: &CircuitBreaker, domain: &Domain) -> Result<(), DispatchError> {
        registry
            .execute(domain, || async {
                Err::<(), _>(DeliveryError::Connection("refused".into()))
            })
            .await
    }

    async fn succeed(registry: &CircuitBreaker, domain: &Domain) -> Result<(), DispatchError> {
        registry.execute(domain, || async { Ok(()) }).await
    }

    #[tokio::test]
    async fn trips_at_failure_ratio_with_minimum_calls() {
        let registry = CircuitBreaker::new(config());
        let domain = Domain::new("example.com");

        // Two failures out of two calls: ratio met but not minimum calls.
        assert!(fail(&registry, &domain).await.is_err());
        assert!(fail(&registry, &domain).await.is_err());
        assert_eq!(registry.state(&domain), BreakerState::Closed);

        // Third call fails: 3 calls, ratio 1.0.
        assert!(fail(&registry, &domain).await.is_err());
        assert_eq!(registry.state(&domain), BreakerState::Open);
    }

    #[tokio::test]
    async fn two_failures_in_three_calls_trip() {
        let registry = CircuitBreaker::new(config());
        let domain = Domain::new("example.com");

        succeed(&registry, &domain).await.unwrap();
        assert!(fail(&registry, &domain).await.is_err());
        assert_eq!(registry.state(&domain), BreakerState::Closed);

        // 2 failures / 3 calls = 0.667 >= 0.6
        assert!(fail(&registry, &domain).await.is_err());
        assert_eq!(registry.state(&domain), BreakerState::Open);
    }

    #[tokio::test]
    async fn open_breaker_rejects_without_invoking() {
        let registry = CircuitBreaker::new(config());
        let domain = Domain::new("example.com");

        for _ in 0..3 {
            let _ = fail(&registry, &domain).await;
        }
        assert_eq!(registry.state(&domain), BreakerState::Open);

        let invoked = AtomicUsize::new(0);
        let result = registry
            .execute(&domain, || {
                invoked.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(matches!(result, Err(DispatchError::CircuitOpen(_))));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn half_open_closes_after_enough_successes() {
        let registry = CircuitBreaker::new(BreakerConfig {
            open_timeout_secs: 0,
            ..config()
        });
        let domain = Domain::new("example.com");

        for _ in 0..3 {
            let _ = fail(&registry, &domain).await;
        }
        assert_eq!(registry.state(&domain), BreakerState::Open);

        // Timeout of zero: the next calls are half-open trials.
        succeed(&registry, &domain).await.unwrap();
        assert_eq!(registry.state(&domain), BreakerState::HalfOpen);
        succeed(&registry, &domain).await.unwrap();
        succeed(&registry, &domain).await.unwrap();
        assert_eq!(registry.state(&domain), BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let registry = CircuitBreaker::new(BreakerConfig {
            open_timeout_secs: 0,
            ..config()
        });
        let domain = Domain::new("example.com");

        for _ in 0..3 {
            let _ = fail(&registry, &domain).await;
        }

        succeed(&registry, &domain).await.unwrap();
        assert_eq!(registry.state(&domain), BreakerState::HalfOpen);

        assert!(fail(&registry, &domain).await.is_err());
        assert_eq!(registry.state(&domain), BreakerState::Open);
    }

    #[test]
    fn half_open_admission_is_capped() {
        let config = config();
        let mut breaker = Breaker::new();
        breaker.trip();
        breaker.opened_at = Some(Instant::now() - Duration::from_secs(60));

        // First admission performs the transition and counts as a trial.
        assert!(breaker.try_admit(&config));
        assert_eq!(breaker.state, BreakerState::HalfOpen);
        assert!(breaker.try_admit(&config));
        assert!(breaker.try_admit(&config));

        // Fourth concurrent trial is rejected.
        assert!(!breaker.try_admit(&config));
    }

    #[tokio::test]
    async fn window_expiry_resets_counts() {
        // With a zero-length window every call starts a fresh count, so the
        // minimum-calls bar is never reached.
        let registry = CircuitBreaker::new(BreakerConfig {
            interval_secs: 0,
            ..config()
        });
        let domain = Domain::new("example.com");

        for _ in 0..5 {
            let _ = fail(&registry, &domain).await;
        }
        assert_eq!(registry.state(&domain), BreakerState::Closed);
    }

    #[tokio::test]
    async fn domains_are_isolated() {
        let registry = CircuitBreaker::new(config());
        let noisy = Domain::new("noisy.example");
        let quiet = Domain::new("quiet.example");

        for _ in 0..3 {
            let _ = fail(&registry, &noisy).await;
        }

        assert_eq!(registry.state(&noisy), BreakerState::Open);
        assert_eq!(registry.state(&quiet), BreakerState::Closed);
        succeed(&registry, &quiet).await.unwrap();
    }

    #[tokio::test]
    async fn failure_count_tracks_window() {
        let registry = CircuitBreaker::new(config());
        let domain = Domain::new("example.com");

        assert_eq!(registry.failure_count(&domain), 0);
        let _ = fail(&registry, &domain).await;
        assert_eq!(registry.failure_count(&domain), 1);
        succeed(&registry, &domain).await.unwrap();
        assert_eq!(registry.failure_count(&domain), 1);
    }
}
