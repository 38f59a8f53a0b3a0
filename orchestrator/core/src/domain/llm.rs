// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Llm
//!
//! Provides the provider-agnostic response shape and client interface.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Implements llm

// LLM Provider Domain Interface (Anti-Corruption Layer)
//
// Every adapter in infrastructure/llm/ turns its vendor payload into a
// ProviderResponse, so orchestration and consensus never see vendor types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::credential::redact;
use crate::domain::provider::ProviderName;

/// Domain interface for LLM providers.
///
/// `send` never fails: every outcome, including a missing key or a
/// transport timeout, is reported through [`ProviderResponse::error`].
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Provider this client talks to
    fn provider(&self) -> ProviderName;

    /// Issue one completion request
    async fn send(
        &self,
        text: &str,
        api_key: Option<&str>,
        model: &str,
        timeout: Duration,
    ) -> ProviderResponse;
}

/// Options for LLM generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,

    /// Sampling temperature (0.0 = deterministic, 1.0 = creative)
    pub temperature: Option<f32>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: Some(1024),
            temperature: Some(0.7),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Outcome of one provider call.
///
/// Both `response` and `error` are always present on the wire; when
/// `error` is set the text is empty and carries no meaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    provider: ProviderName,
    model: String,
    response: String,
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_usage: Option<TokenUsage>,
}

impl ProviderResponse {
    pub fn success(
        provider: ProviderName,
        model: impl Into<String>,
        text: impl Into<String>,
        token_usage: Option<TokenUsage>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            response: text.into(),
            error: None,
            token_usage,
        }
    }

    pub fn failure(provider: ProviderName, model: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            response: String::new(),
            error: Some(error.into()),
            token_usage: None,
        }
    }

    /// Failure built from an adapter error, with key material scrubbed
    pub fn from_error(
        provider: ProviderName,
        model: impl Into<String>,
        error: &LLMError,
        api_key: Option<&str>,
    ) -> Self {
        Self::failure(provider, model, redact(&error.to_string(), api_key))
    }

    pub fn provider(&self) -> ProviderName {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn response_text(&self) -> &str {
        &self.response
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn token_usage(&self) -> Option<&TokenUsage> {
        self.token_usage.as_ref()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// No error and non-blank text
    pub fn is_valid(&self) -> bool {
        self.error.is_none() && !self.response.trim().is_empty()
    }
}

/// Errors that can occur inside a provider adapter.
///
/// The `Display` text is exactly what ends up in `ProviderResponse::error`.
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("{} API key not provided", .0.display_name())]
    MissingApiKey(ProviderName),

    #[error("API error: {status}")]
    Http { status: u16, body: String },

    #[error("Request timeout ({})", format_timeout(.0))]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response from {}: {reason}", .provider.display_name())]
    InvalidResponse { provider: ProviderName, reason: String },
}

/// `30s`, or `0.5s` for sub-second timeouts
pub fn format_timeout(timeout: &Duration) -> String {
    if timeout.subsec_nanos() == 0 {
        format!("{}s", timeout.as_secs())
    } else {
        format!("{:.1}s", timeout.as_secs_f64())
    }
}
