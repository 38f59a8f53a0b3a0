// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Ollama LLM Provider Adapter
//
// Anti-Corruption Layer for Ollama local models.
// No key is required; one is forwarded as a bearer token when given, for
// servers sitting behind an authenticating proxy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{decode, execute, into_response, join_url, require_text, Completion};
use crate::domain::llm::{GenerationOptions, LLMError, ProviderClient, ProviderResponse, TokenUsage};
use crate::domain::provider::ProviderName;

pub struct OllamaAdapter {
    client: reqwest::Client,
    endpoint: String,
    options: GenerationOptions,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
    eval_count: Option<u32>,
    prompt_eval_count: Option<u32>,
}

impl OllamaAdapter {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            options: GenerationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn complete(
        &self,
        text: &str,
        api_key: Option<&str>,
        model: &str,
        timeout: Duration,
    ) -> Result<Completion, LLMError> {
        let request = OllamaRequest {
            model,
            prompt: text,
            stream: false,
            options: Some(OllamaOptions {
                temperature: self.options.temperature,
                num_predict: self.options.max_tokens,
            }),
        };

        let mut builder = self
            .client
            .post(join_url(&self.endpoint, "/api/generate"))
            .json(&request);
        if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
            builder = builder.bearer_auth(key);
        }

        let response = execute(builder, timeout).await?;
        let body: OllamaResponse = decode(response, ProviderName::Ollama, timeout).await?;

        let usage = match (body.prompt_eval_count, body.eval_count) {
            (None, None) => None,
            (prompt, completion) => Some(TokenUsage::new(
                prompt.unwrap_or(0),
                completion.unwrap_or(0),
            )),
        };

        Ok(Completion {
            text: require_text(ProviderName::Ollama, body.response)?,
            usage,
        })
    }
}

#[async_trait]
impl ProviderClient for OllamaAdapter {
    fn provider(&self) -> ProviderName {
        ProviderName::Ollama
    }

    async fn send(
        &self,
        text: &str,
        api_key: Option<&str>,
        model: &str,
        timeout: Duration,
    ) -> ProviderResponse {
        let outcome = self.complete(text, api_key, model, timeout).await;
        into_response(ProviderName::Ollama, model, api_key, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generate_without_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/generate")
            .match_header("authorization", mockito::Matcher::Missing)
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "model": "llama3.2",
                "prompt": "hello",
                "stream": false
            })))
            .with_status(200)
            .with_body(r#"{"model":"llama3.2","response":"Hi there.","done":true,"prompt_eval_count":2,"eval_count":3}"#)
            .create_async()
            .await;

        let adapter = OllamaAdapter::new(server.url());
        let response = adapter.send("hello", None, "llama3.2", Duration::from_secs(5)).await;

        mock.assert_async().await;
        assert_eq!(response.response_text(), "Hi there.");
        assert_eq!(response.token_usage(), Some(&TokenUsage::new(2, 3)));
    }

    #[tokio::test]
    async fn test_unknown_model() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/generate")
            .with_status(404)
            .with_body(r#"{"error":"model 'nope' not found"}"#)
            .create_async()
            .await;

        let adapter = OllamaAdapter::new(server.url());
        let response = adapter.send("hello", None, "nope", Duration::from_secs(5)).await;
        assert_eq!(response.error(), Some("API error: 404"));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error() {
        // port 9 (discard) is closed on test hosts
        let adapter = OllamaAdapter::new("http://127.0.0.1:9");
        let response = adapter.send("hello", None, "llama3.2", Duration::from_secs(5)).await;
        assert!(response.error().unwrap().starts_with("Network error"));
    }
}
