// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Guarded Provider Call
//
// The explicit guard chain run for every provider call:
//
//   RateLimiter::admit -> CircuitBreaker::call -> timeout -> ProviderClient::send
//
// Every way the chain can stop is turned into a ProviderResponse error, so
// callers only ever see data.

use std::future::Future;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::domain::circuit_breaker::{BreakerError, CircuitBreaker};
use crate::domain::llm::{LLMError, ProviderResponse};
use crate::domain::rate_limiter::{Admission, RateLimiter};

/// Why a call inside the breaker counted as a failure
enum CallFailure {
    /// The client answered with an error response
    Provider(ProviderResponse),
    Timeout,
}

pub fn rate_limited_message(retry_after_secs: u64) -> String {
    format!("Rate limit exceeded. Retry after {retry_after_secs} seconds")
}

/// Run `call` behind `limiter` (keyed by `identifier`) and `breaker`,
/// abandoning it after `timeout`.
///
/// An error response from `call` counts as a breaker failure just like a
/// timeout does; the response itself is passed back unchanged.
pub async fn guarded_call<F, Fut>(
    limiter: &RateLimiter,
    identifier: &str,
    breaker: &CircuitBreaker,
    timeout: Duration,
    model: &str,
    call: F,
) -> ProviderResponse
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ProviderResponse>,
{
    let provider = breaker.identity().provider;
    let fingerprint = breaker.identity().fingerprint.short();

    if let Admission::Denied {
        retry_after_secs,
        limit,
    } = limiter.admit(identifier)
    {
        warn!(
            provider = %provider,
            fingerprint = %fingerprint,
            limit = ?limit,
            retry_after_secs,
            "Provider call rate limited"
        );
        record_outcome(provider.as_str(), "rate_limited");
        return ProviderResponse::failure(provider, model, rate_limited_message(retry_after_secs));
    }

    let started = Instant::now();
    let result = breaker
        .call(|| async {
            match tokio::time::timeout(timeout, call()).await {
                Ok(response) if response.is_error() => Err(CallFailure::Provider(response)),
                Ok(response) => Ok(response),
                Err(_) => Err(CallFailure::Timeout),
            }
        })
        .await;

    match result {
        Ok(response) => {
            record_latency(provider.as_str(), started);
            record_outcome(provider.as_str(), "success");
            response
        }
        Err(BreakerError::Open) => {
            warn!(provider = %provider, fingerprint = %fingerprint, "Provider call rejected, circuit open");
            record_outcome(provider.as_str(), "circuit_open");
            ProviderResponse::failure(provider, model, BreakerError::<LLMError>::Open.to_string())
        }
        Err(BreakerError::Inner(CallFailure::Provider(response))) => {
            record_latency(provider.as_str(), started);
            warn!(
                provider = %provider,
                fingerprint = %fingerprint,
                error = response.error().unwrap_or_default(),
                "Provider call failed"
            );
            record_outcome(provider.as_str(), "error");
            response
        }
        Err(BreakerError::Inner(CallFailure::Timeout)) => {
            record_latency(provider.as_str(), started);
            warn!(
                provider = %provider,
                fingerprint = %fingerprint,
                timeout_ms = timeout.as_millis() as u64,
                "Provider call timed out"
            );
            record_outcome(provider.as_str(), "timeout");
            ProviderResponse::failure(provider, model, LLMError::Timeout(timeout).to_string())
        }
    }
}

fn record_outcome(provider: &'static str, outcome: &'static str) {
    metrics::counter!(
        "concord_provider_requests_total",
        "provider" => provider,
        "outcome" => outcome
    )
    .increment(1);
}

fn record_latency(provider: &'static str, started: Instant) {
    metrics::histogram!("concord_provider_latency_seconds", "provider" => provider)
        .record(started.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use crate::domain::provider::{ProviderIdentity, ProviderName};
    use crate::domain::rate_limiter::RateLimitConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            ProviderIdentity::from_api_key(ProviderName::OpenAI, "sk-guard-test"),
            CircuitBreakerConfig::default(),
        )
    }

    fn ok() -> ProviderResponse {
        ProviderResponse::success(ProviderName::OpenAI, "gpt", "fine", None)
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let limiter = RateLimiter::default();
        let breaker = breaker();
        let response =
            guarded_call(&limiter, "id", &breaker, Duration::from_secs(1), "gpt", || async { ok() }).await;
        assert_eq!(response.response_text(), "fine");
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_denied_admission_never_calls_provider() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_minute: 1,
            requests_per_hour: 100,
            requests_per_day: 100,
            burst_size: 1,
        });
        let breaker = breaker();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            guarded_call(&limiter, "id", &breaker, Duration::from_secs(1), "gpt", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                ok()
            })
            .await;
        }
        let denied =
            guarded_call(&limiter, "id", &breaker, Duration::from_secs(1), "gpt", || async { ok() }).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(denied.error(), Some("Rate limit exceeded. Retry after 60 seconds"));
        // admission denials are not breaker failures
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let limiter = RateLimiter::default();
        let breaker = breaker();
        let response = guarded_call(&limiter, "id", &breaker, Duration::from_secs(30), "gpt", || async {
            tokio::time::sleep(Duration::from_secs(120)).await;
            ok()
        })
        .await;

        assert_eq!(response.error(), Some("Request timeout (30s)"));
        assert_eq!(breaker.consecutive_failures(), 1);
    }

    #[tokio::test]
    async fn test_error_responses_open_the_circuit() {
        let limiter = RateLimiter::default();
        let breaker = breaker();
        let failing = || async { ProviderResponse::failure(ProviderName::OpenAI, "gpt", "API error: 500") };

        for _ in 0..5 {
            let response =
                guarded_call(&limiter, "id", &breaker, Duration::from_secs(1), "gpt", failing).await;
            assert_eq!(response.error(), Some("API error: 500"));
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let rejected =
            guarded_call(&limiter, "id", &breaker, Duration::from_secs(1), "gpt", || async { ok() }).await;
        assert_eq!(
            rejected.error(),
            Some("Service temporarily unavailable (circuit breaker open)")
        );
    }
}
