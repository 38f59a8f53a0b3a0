// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Circuit Breaker
//!
//! One breaker per [`ProviderIdentity`], so a failing credential only ever
//! trips its own circuit. The registry is an injected object rather than
//! process-global state; tests build their own and throw it away.
//!
//! ```text
//!   closed --(threshold consecutive failures)--> open
//!   open   --(reset timeout elapsed)-----------> half_open
//!   half_open --(trial succeeds)---------------> closed
//!   half_open --(trial fails)------------------> open
//! ```
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Failure isolation per (provider, credential) pair

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::domain::credential::CredentialFingerprint;
use crate::domain::provider::{ProviderIdentity, ProviderName};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            reset_timeout: DEFAULT_RESET_TIMEOUT,
        }
    }
}

/// Result of a guarded call that did not succeed
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// Rejected without invoking the wrapped function
    #[error("Service temporarily unavailable (circuit breaker open)")]
    Open,

    /// The wrapped function's own error, untouched
    #[error(transparent)]
    Inner(E),
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_until: Option<Instant>,
    last_state_change: DateTime<Utc>,
    trial_in_flight: bool,
    /// Bumped on every transition
    generation: u64,
}

/// Point-in-time view of a breaker, safe to serialize
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub provider: ProviderName,
    /// Truncated fingerprint
    pub fingerprint: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_state_change: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_until_half_open: Option<u64>,
}

pub struct CircuitBreaker {
    identity: ProviderIdentity,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

/// Releases the half-open trial slot when the trial call ends, including
/// when its future is dropped mid-flight.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
}

/// A call let through by [`CircuitBreaker::admit`]. Its outcome only counts
/// while the breaker is still in the state it was admitted under.
struct Admission<'a> {
    generation: u64,
    _trial: Option<TrialGuard<'a>>,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        self.breaker.inner.lock().trial_in_flight = false;
    }
}

impl CircuitBreaker {
    pub fn new(identity: ProviderIdentity, config: CircuitBreakerConfig) -> Self {
        Self {
            identity,
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_until: None,
                last_state_change: Utc::now(),
                trial_in_flight: false,
                generation: 0,
            }),
        }
    }

    pub fn identity(&self) -> &ProviderIdentity {
        &self.identity
    }

    /// Current state, applying an elapsed open period first
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.advance(&mut inner, Instant::now());
        inner.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Run `f` under the breaker.
    ///
    /// An `Err` from `f` counts as a failure and comes back as
    /// [`BreakerError::Inner`]. While open, `f` is never invoked.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = self.admit::<E>()?;

        match f().await {
            Ok(value) => {
                self.record_success(&admission);
                Ok(value)
            }
            Err(err) => {
                self.record_failure(&admission);
                Err(BreakerError::Inner(err))
            }
        }
    }

    fn admit<E>(&self) -> Result<Admission<'_>, BreakerError<E>> {
        let mut inner = self.inner.lock();
        self.advance(&mut inner, Instant::now());

        let trial = match inner.state {
            CircuitState::Closed => None,
            CircuitState::Open => return Err(BreakerError::Open),
            CircuitState::HalfOpen if inner.trial_in_flight => return Err(BreakerError::Open),
            CircuitState::HalfOpen => {
                inner.trial_in_flight = true;
                Some(TrialGuard { breaker: self })
            }
        };

        Ok(Admission {
            generation: inner.generation,
            _trial: trial,
        })
    }

    /// open -> half_open once the reset timeout has passed
    fn advance(&self, inner: &mut BreakerState, now: Instant) {
        if inner.state != CircuitState::Open {
            return;
        }
        if inner.opened_until.is_some_and(|until| now >= until) {
            inner.opened_until = None;
            self.transition(inner, CircuitState::HalfOpen);
        }
    }

    fn record_success(&self, admission: &Admission<'_>) {
        let mut inner = self.inner.lock();
        // admitted before a sibling moved the circuit on; the outcome is stale
        if inner.generation != admission.generation {
            return;
        }
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                inner.consecutive_failures = 0;
                self.transition(&mut inner, CircuitState::Closed);
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self, admission: &Admission<'_>) {
        let mut inner = self.inner.lock();
        if inner.generation != admission.generation {
            return;
        }
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        match inner.state {
            CircuitState::Closed if inner.consecutive_failures >= self.config.failure_threshold => {
                self.trip(&mut inner);
            }
            CircuitState::HalfOpen => self.trip(&mut inner),
            _ => {}
        }
    }

    fn trip(&self, inner: &mut BreakerState) {
        inner.opened_until = Some(Instant::now() + self.config.reset_timeout);
        self.transition(inner, CircuitState::Open);
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.generation = inner.generation.wrapping_add(1);
        inner.last_state_change = Utc::now();

        let provider = self.identity.provider;
        let fingerprint = self.identity.fingerprint.short();
        match to {
            CircuitState::Open => warn!(
                provider = %provider,
                fingerprint = %fingerprint,
                from = %from,
                failures = inner.consecutive_failures,
                reset_secs = self.config.reset_timeout.as_secs(),
                "Circuit breaker opened"
            ),
            _ => info!(
                provider = %provider,
                fingerprint = %fingerprint,
                from = %from,
                to = %to,
                "Circuit breaker state change"
            ),
        }

        metrics::counter!(
            "concord_circuit_breaker_transitions_total",
            "provider" => provider.as_str(),
            "to" => to.as_str()
        )
        .increment(1);
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.advance(&mut inner, now);

        let seconds_until_half_open = match (inner.state, inner.opened_until) {
            (CircuitState::Open, Some(until)) => {
                let remaining = until.saturating_duration_since(now);
                Some(remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0))
            }
            _ => None,
        };

        BreakerSnapshot {
            provider: self.identity.provider,
            fingerprint: self.identity.fingerprint.short().to_string(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_state_change: inner.last_state_change,
            seconds_until_half_open,
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("identity", &self.identity.to_string())
            .field("config", &self.config)
            .field("state", &self.inner.lock().state)
            .finish()
    }
}

/// Owns every breaker for the life of the process.
///
/// Get-or-create goes through the map's entry API, which holds the shard
/// lock for the key, so racing first callers all receive the same `Arc`.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<ProviderIdentity, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn get_breaker(&self, identity: &ProviderIdentity) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(identity) {
            return Arc::clone(existing.value());
        }

        let entry = self
            .breakers
            .entry(identity.clone())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(identity.clone(), self.config)));
        Arc::clone(entry.value())
    }

    pub fn get(&self, provider: ProviderName, fingerprint: &CredentialFingerprint) -> Arc<CircuitBreaker> {
        self.get_breaker(&ProviderIdentity::new(provider, fingerprint.clone()))
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Snapshots ordered by provider, then fingerprint
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|entry| Arc::clone(entry.value())).collect();
        breakers.sort_by(|a, b| {
            (a.identity.provider, a.identity.fingerprint.as_str())
                .cmp(&(b.identity.provider, b.identity.fingerprint.as_str()))
        });
        breakers.iter().map(|breaker| breaker.snapshot()).collect()
    }

    /// Forget every breaker. Handles already given out keep working but are
    /// no longer shared with new callers.
    pub fn reset(&self) {
        self.breakers.clear();
        info!("Circuit breaker registry reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn identity(key: &str) -> ProviderIdentity {
        ProviderIdentity::from_api_key(ProviderName::OpenAI, key)
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        breaker.call(|| async { Err::<(), _>("boom") }).await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<u32, BreakerError<&'static str>> {
        breaker.call(|| async { Ok::<_, &'static str>(7) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_exactly_threshold_failures() {
        let breaker = CircuitBreaker::new(identity("k"), CircuitBreakerConfig::default());

        for _ in 0..4 {
            assert!(matches!(fail(&breaker).await, Err(BreakerError::Inner("boom"))));
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        assert!(fail(&breaker).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.consecutive_failures(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count_while_closed() {
        let breaker = CircuitBreaker::new(identity("k"), CircuitBreakerConfig::default());

        for _ in 0..4 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(succeed(&breaker).await.unwrap(), 7);
        assert_eq!(breaker.consecutive_failures(), 0);

        for _ in 0..4 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_never_invokes_function() {
        let breaker = CircuitBreaker::new(identity("k"), CircuitBreakerConfig::default());
        for _ in 0..5 {
            let _ = fail(&breaker).await;
        }

        let invoked = AtomicU32::new(0);
        let result = breaker
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &'static str>(())
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Open)));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(
            BreakerError::<std::io::Error>::Open.to_string(),
            "Service temporarily unavailable (circuit breaker open)"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes() {
        let breaker = CircuitBreaker::new(identity("k"), CircuitBreakerConfig::default());
        for _ in 0..5 {
            let _ = fail(&breaker).await;
        }

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        assert!(succeed(&breaker).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_with_fresh_timeout() {
        let breaker = CircuitBreaker::new(identity("k"), CircuitBreakerConfig::default());
        for _ in 0..5 {
            let _ = fail(&breaker).await;
        }
        tokio::time::advance(DEFAULT_RESET_TIMEOUT).await;

        assert!(matches!(fail(&breaker).await, Err(BreakerError::Inner(_))));
        assert_eq!(breaker.state(), CircuitState::Open);

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.seconds_until_half_open, Some(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_trial() {
        let breaker = Arc::new(CircuitBreaker::new(identity("k"), CircuitBreakerConfig::default()));
        for _ in 0..5 {
            let _ = fail(&breaker).await;
        }
        tokio::time::advance(DEFAULT_RESET_TIMEOUT).await;

        let slow = {
            let breaker = Arc::clone(&breaker);
            tokio::spawn(async move {
                breaker
                    .call(|| async {
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        Ok::<_, &'static str>(1)
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        assert!(matches!(succeed(&breaker).await, Err(BreakerError::Open)));
        assert_eq!(slow.await.unwrap().unwrap(), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_closed_era_outcomes_are_ignored() {
        let breaker = Arc::new(CircuitBreaker::new(identity("k"), CircuitBreakerConfig::default()));

        let spawn_slow = |result: Result<u32, &'static str>, secs: u64| {
            let breaker = Arc::clone(&breaker);
            tokio::spawn(async move {
                breaker
                    .call(|| async move {
                        tokio::time::sleep(Duration::from_secs(secs)).await;
                        result
                    })
                    .await
            })
        };

        // admitted while closed, finishing well after the reset timeout
        let late_success = spawn_slow(Ok(1), 70);
        let late_failure = spawn_slow(Err("late"), 75);
        tokio::task::yield_now().await;

        for _ in 0..5 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(DEFAULT_RESET_TIMEOUT).await;
        let trial = spawn_slow(Ok(2), 30);
        tokio::task::yield_now().await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        assert_eq!(late_success.await.unwrap().unwrap(), 1);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(matches!(late_failure.await.unwrap(), Err(BreakerError::Inner("late"))));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.consecutive_failures(), 5);

        // only the trial decides
        assert_eq!(trial.await.unwrap().unwrap(), 2);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_trial_releases_slot() {
        let breaker = CircuitBreaker::new(identity("k"), CircuitBreakerConfig::default());
        for _ in 0..5 {
            let _ = fail(&breaker).await;
        }
        tokio::time::advance(DEFAULT_RESET_TIMEOUT).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            breaker.call(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, &'static str>(0)
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        assert!(succeed(&breaker).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breakers_are_isolated_per_credential() {
        let registry = CircuitBreakerRegistry::default();
        let bad = registry.get_breaker(&identity("bad-key"));
        let good = registry.get_breaker(&identity("good-key"));

        for _ in 0..5 {
            let _ = fail(&bad).await;
        }

        assert_eq!(bad.state(), CircuitState::Open);
        assert_eq!(good.state(), CircuitState::Closed);
        assert!(succeed(&good).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_get_or_create_returns_one_instance() {
        let registry = Arc::new(CircuitBreakerRegistry::default());
        let id = identity("shared");

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let id = id.clone();
                tokio::spawn(async move { registry.get_breaker(&id) })
            })
            .collect();

        let mut breakers = Vec::new();
        for handle in handles {
            breakers.push(handle.await.unwrap());
        }

        assert_eq!(registry.len(), 1);
        assert!(breakers.iter().all(|b| Arc::ptr_eq(b, &breakers[0])));
    }

    #[test]
    fn test_snapshots_truncate_fingerprints_and_reset_clears() {
        let registry = CircuitBreakerRegistry::default();
        registry.get(ProviderName::Claude, &CredentialFingerprint::from_api_key("a"));
        registry.get(ProviderName::OpenAI, &CredentialFingerprint::from_api_key("b"));

        let snapshots = registry.snapshots();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].provider, ProviderName::OpenAI);
        assert!(snapshots.iter().all(|s| s.fingerprint.len() == 8));
        assert!(snapshots.iter().all(|s| s.state == CircuitState::Closed));

        registry.reset();
        assert!(registry.is_empty());
    }
}
