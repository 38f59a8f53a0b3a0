// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// LLM Provider Infrastructure - Anti-Corruption Layer Implementations
//
// Each adapter translates between the ProviderClient domain interface and
// one vendor's HTTP API. Transport, status and decoding failures are mapped
// here, once, so every adapter reports them with the same wording.

pub mod anthropic;
pub mod gemini;
pub mod grok;
pub mod ollama;
pub mod openai;
pub mod registry;

pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use grok::GrokAdapter;
pub use ollama::OllamaAdapter;
pub use openai::OpenAIAdapter;
pub use registry::ProviderRegistry;

use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::domain::llm::{LLMError, ProviderResponse, TokenUsage};
use crate::domain::provider::ProviderName;

/// Text and usage extracted from a successful vendor response
#[derive(Debug)]
pub(crate) struct Completion {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

/// Issue a prepared request under `timeout` and reject non-2xx statuses
pub(crate) async fn execute(
    request: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<reqwest::Response, LLMError> {
    let response = request
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| map_transport_error(e, timeout))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(LLMError::Http {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

/// Decode a 2xx body, treating anything unexpected as an invalid response
pub(crate) async fn decode<T: DeserializeOwned>(
    response: reqwest::Response,
    provider: ProviderName,
    timeout: Duration,
) -> Result<T, LLMError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| map_transport_error(e, timeout))?;
    serde_json::from_slice(&bytes).map_err(|e| LLMError::InvalidResponse {
        provider,
        reason: e.to_string(),
    })
}

pub(crate) fn map_transport_error(error: reqwest::Error, timeout: Duration) -> LLMError {
    if error.is_timeout() {
        LLMError::Timeout(timeout)
    } else {
        LLMError::Network(error.without_url().to_string())
    }
}

pub(crate) fn require_text(provider: ProviderName, text: String) -> Result<String, LLMError> {
    if text.trim().is_empty() {
        return Err(LLMError::InvalidResponse {
            provider,
            reason: "no text in response".to_string(),
        });
    }
    Ok(text)
}

/// Shared tail of every adapter's `send`: turn the outcome into the
/// uniform response shape, scrubbing the key out of any error text
pub(crate) fn into_response(
    provider: ProviderName,
    model: &str,
    api_key: Option<&str>,
    outcome: Result<Completion, LLMError>,
) -> ProviderResponse {
    match outcome {
        Ok(completion) => ProviderResponse::success(provider, model, completion.text, completion.usage),
        Err(err) => {
            tracing::debug!(provider = %provider, model = %model, error = %err, "Provider call failed");
            ProviderResponse::from_error(provider, model, &err, api_key)
        }
    }
}

/// Non-empty key, or the "not provided" failure
pub(crate) fn require_key(provider: ProviderName, api_key: Option<&str>) -> Result<&str, LLMError> {
    api_key
        .filter(|key| !key.trim().is_empty())
        .ok_or(LLMError::MissingApiKey(provider))
}

pub(crate) fn join_url(endpoint: &str, path: &str) -> String {
    format!("{}{}", endpoint.trim_end_matches('/'), path)
}
