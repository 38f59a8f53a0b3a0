// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Orchestrator
//!
//! Fans one input text out to every requested provider and gathers a
//! response for each of them.
//!
//! - Providers that need a key and were given none are skipped.
//! - Input larger than a provider's context budget is chunked with
//!   [`SmartChunker`] and only the first chunk is sent to that provider.
//! - Every call runs through [`guarded_call`]; whatever happens to it, the
//!   provider's slot is filled with a [`ProviderResponse`].
//! - Output order is request order, never completion order.
//!
//! All calls of one run live in a single `join_all`, so dropping the run
//! future drops every in-flight call with it. Cancelling the token passed to
//! [`Orchestrator::run_with_cancellation`] ends the remaining calls with a
//! "Request cancelled" response instead.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::application::guard::guarded_call;
use crate::domain::chunker::{ChunkerError, SmartChunker};
use crate::domain::circuit_breaker::CircuitBreakerRegistry;
use crate::domain::config::OrchestratorConfigSpec;
use crate::domain::credential::CredentialFingerprint;
use crate::domain::llm::ProviderResponse;
use crate::domain::provider::{ProviderIdentity, ProviderName};
use crate::domain::rate_limiter::RateLimiter;
use crate::domain::tokens::ContextBudget;
use crate::infrastructure::llm::ProviderRegistry;

pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 5;
pub const DEFAULT_STAGGER_DELAY: Duration = Duration::from_millis(500);

pub const CANCELLED_MESSAGE: &str = "Request cancelled";

/// One provider to consult in a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub provider: ProviderName,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ProviderRequest {
    pub fn new(provider: ProviderName) -> Self {
        Self {
            provider,
            api_key: None,
            model: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Requested model, or the provider's default
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.provider.default_model())
    }

    /// Key with surrounding blanks treated as absent
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }

    /// Whether this request can be sent at all
    fn has_credential(&self) -> bool {
        !self.provider.requires_api_key() || self.api_key().is_some()
    }
}

/// Which chunk of a chunked input a provider received
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub provider: ProviderName,
    pub total_chunks: usize,
    /// 1-based index of the chunk that was sent
    pub processing_chunk_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub responses: Vec<ProviderResponse>,
    pub chunked: bool,
    /// First chunked provider in request order
    pub chunk_info: Option<ChunkInfo>,
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Per-call timeout must be greater than zero")]
    InvalidTimeout,

    #[error("Chunking failed: {0}")]
    Chunking(#[from] ChunkerError),

    #[error("Consensus analysis failed: {0}")]
    Analysis(#[from] tokio::task::JoinError),
}

/// A provider call ready to dispatch
struct Dispatch<'a> {
    request: &'a ProviderRequest,
    identity: ProviderIdentity,
    payload: String,
}

pub struct Orchestrator {
    providers: Arc<ProviderRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    limiter: Arc<RateLimiter>,
    chunker: SmartChunker,
    budgets: HashMap<ProviderName, ContextBudget>,
    max_concurrent: usize,
    stagger_delay: Duration,
}

impl Orchestrator {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        breakers: Arc<CircuitBreakerRegistry>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            providers,
            breakers,
            limiter,
            chunker: SmartChunker::default(),
            budgets: HashMap::new(),
            max_concurrent: DEFAULT_MAX_CONCURRENT_REQUESTS,
            stagger_delay: DEFAULT_STAGGER_DELAY,
        }
    }

    /// Wire an orchestrator from configuration. Breakers and limiter are
    /// created fresh; use [`new`](Self::new) to share existing ones.
    pub fn from_config(spec: &OrchestratorConfigSpec, providers: Arc<ProviderRegistry>) -> Self {
        let budgets = ProviderName::ALL
            .iter()
            .map(|&name| (name, spec.context_budget(name)))
            .collect();

        Self {
            providers,
            breakers: Arc::new(CircuitBreakerRegistry::new(spec.circuit_breaker_config())),
            limiter: Arc::new(RateLimiter::new(spec.rate_limit.primary)),
            chunker: SmartChunker::new(spec.chunking.overlap_chars),
            budgets,
            max_concurrent: spec.orchestration.max_concurrent_requests,
            stagger_delay: spec.stagger_delay(),
        }
    }

    pub fn with_budget(mut self, provider: ProviderName, budget: ContextBudget) -> Self {
        self.budgets.insert(provider, budget);
        self
    }

    pub fn with_chunker(mut self, chunker: SmartChunker) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_stagger_delay(mut self, delay: Duration) -> Self {
        self.stagger_delay = delay;
        self
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn budget(&self, provider: ProviderName) -> ContextBudget {
        self.budgets
            .get(&provider)
            .copied()
            .unwrap_or_else(|| ContextBudget::new(provider.default_context_tokens()))
    }

    pub async fn run(
        &self,
        text: &str,
        requests: &[ProviderRequest],
        per_call_timeout: Duration,
    ) -> Result<RunOutcome, OrchestratorError> {
        self.run_with_cancellation(text, requests, per_call_timeout, CancellationToken::new())
            .await
    }

    pub async fn run_with_cancellation(
        &self,
        text: &str,
        requests: &[ProviderRequest],
        per_call_timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, OrchestratorError> {
        if per_call_timeout.is_zero() {
            return Err(OrchestratorError::InvalidTimeout);
        }

        let mut dispatches = Vec::with_capacity(requests.len());
        let mut chunk_info = None;

        for request in requests {
            if !request.has_credential() {
                debug!(provider = %request.provider, "No API key supplied, skipping provider");
                continue;
            }

            let (payload, info) = self.prepare_payload(text, request.provider)?;
            if chunk_info.is_none() {
                chunk_info = info;
            }

            dispatches.push(Dispatch {
                request,
                identity: self.identity_for(request),
                payload,
            });
        }

        if dispatches.len() > 1 && !self.stagger_delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.stagger_delay) => {}
                _ = cancel.cancelled() => {}
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent.max(1)));
        let futures = dispatches.into_iter().map(|dispatch| {
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            async move {
                let provider = dispatch.request.provider;
                let model = dispatch.request.model();

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => ProviderResponse::failure(provider, model, CANCELLED_MESSAGE),
                    response = self.dispatch(&dispatch, &semaphore, per_call_timeout) => response,
                }
            }
        });
        let responses = join_all(futures).await;

        let failed = responses.iter().filter(|r| r.is_error()).count();
        info!(
            requested = requests.len(),
            dispatched = responses.len(),
            succeeded = responses.len() - failed,
            failed,
            chunked = chunk_info.is_some(),
            "Orchestration run complete"
        );

        Ok(RunOutcome {
            responses,
            chunked: chunk_info.is_some(),
            chunk_info,
        })
    }

    async fn dispatch(
        &self,
        dispatch: &Dispatch<'_>,
        semaphore: &Semaphore,
        timeout: Duration,
    ) -> ProviderResponse {
        let provider = dispatch.request.provider;
        let model = dispatch.request.model();

        let Some(client) = self.providers.get(provider) else {
            return ProviderResponse::failure(
                provider,
                model,
                format!("{} provider is not configured", provider.display_name()),
            );
        };

        let Ok(_permit) = semaphore.acquire().await else {
            return ProviderResponse::failure(provider, model, CANCELLED_MESSAGE);
        };

        let breaker = self.breakers.get_breaker(&dispatch.identity);
        let identifier = dispatch.identity.rate_limit_key();
        let api_key = dispatch.request.api_key();

        guarded_call(&self.limiter, &identifier, &breaker, timeout, model, || {
            client.send(&dispatch.payload, api_key, model, timeout)
        })
        .await
    }

    /// Text to send to `provider`, plus chunk metadata when it had to be cut
    fn prepare_payload(
        &self,
        text: &str,
        provider: ProviderName,
    ) -> Result<(String, Option<ChunkInfo>), OrchestratorError> {
        let budget = self.budget(provider);
        if budget.fits(text) {
            return Ok((text.to_string(), None));
        }

        let mut chunks = self.chunker.chunk(text, budget.chunk_chars())?;
        if chunks.len() <= 1 {
            return Ok((chunks.pop().unwrap_or_else(|| text.to_string()), None));
        }

        info!(
            provider = %provider,
            chars = text.chars().count(),
            budget_tokens = budget.max_tokens,
            total_chunks = chunks.len(),
            "Input exceeds provider context budget, sending first chunk"
        );
        metrics::counter!("concord_chunked_requests_total", "provider" => provider.as_str()).increment(1);

        let info = ChunkInfo {
            provider,
            total_chunks: chunks.len(),
            processing_chunk_index: 1,
        };
        Ok((chunks.swap_remove(0), Some(info)))
    }

    /// Keyed providers are identified by their key; a keyless Ollama server
    /// by its endpoint
    fn identity_for(&self, request: &ProviderRequest) -> ProviderIdentity {
        match request.api_key() {
            Some(key) => ProviderIdentity::from_api_key(request.provider, key),
            None => {
                let endpoint = self
                    .providers
                    .endpoint(request.provider)
                    .unwrap_or_else(|| request.provider.default_endpoint());
                ProviderIdentity::new(request.provider, CredentialFingerprint::from_api_key(endpoint))
            }
        }
    }
}
