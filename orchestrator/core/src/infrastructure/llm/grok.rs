// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Grok LLM Provider Adapter
//
// x.ai exposes an OpenAI-compatible chat completions API under /v1.

use async_trait::async_trait;
use std::time::Duration;

use super::openai::chat_completion;
use super::{into_response, join_url, require_key};
use crate::domain::llm::{GenerationOptions, ProviderClient, ProviderResponse};
use crate::domain::provider::ProviderName;

pub struct GrokAdapter {
    client: reqwest::Client,
    endpoint: String,
    options: GenerationOptions,
}

impl GrokAdapter {
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
}

#[async_trait]
impl ProviderClient for GrokAdapter {
    fn provider(&self) -> ProviderName {
        ProviderName::Grok
    }

    async fn send(
        &self,
        text: &str,
        api_key: Option<&str>,
        model: &str,
        timeout: Duration,
    ) -> ProviderResponse {
        let outcome = match require_key(ProviderName::Grok, api_key) {
            Ok(key) => {
                let url = join_url(&self.endpoint, "/v1/chat/completions");
                chat_completion(
                    &self.client,
                    ProviderName::Grok,
                    &url,
                    key,
                    model,
                    text,
                    &self.options,
                    timeout,
                )
                .await
            }
            Err(e) => Err(e),
        };
        into_response(ProviderName::Grok, model, api_key, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_openai_compatible_path() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer xai-test")
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"No."}}]}"#)
            .create_async()
            .await;

        let adapter = GrokAdapter::new(server.url());
        let response = adapter
            .send("Is the sky green?", Some("xai-test"), "grok-2-latest", Duration::from_secs(5))
            .await;

        mock.assert_async().await;
        assert_eq!(response.response_text(), "No.");
        assert!(response.token_usage().is_none());
    }

    #[tokio::test]
    async fn test_rate_limited_upstream() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(429)
            .create_async()
            .await;

        let adapter = GrokAdapter::new(server.url());
        let response = adapter.send("q", Some("xai-k"), "m", Duration::from_secs(5)).await;
        assert_eq!(response.error(), Some("API error: 429"));
    }
}
