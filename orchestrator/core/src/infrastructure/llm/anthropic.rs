// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Anthropic LLM Provider Adapter
//
// Anti-Corruption Layer for the Anthropic Messages API (Claude)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{decode, execute, into_response, join_url, require_key, require_text, Completion};
use crate::domain::llm::{GenerationOptions, LLMError, ProviderClient, ProviderResponse, TokenUsage};
use crate::domain::provider::ProviderName;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter {
    client: reqwest::Client,
    endpoint: String,
    options: GenerationOptions,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicContent>,
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl AnthropicAdapter {
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

    async fn complete(
        &self,
        text: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Completion, LLMError> {
        let request = AnthropicRequest {
            model,
            messages: vec![AnthropicMessage {
                role: "user",
                content: text,
            }],
            max_tokens: self.options.max_tokens.unwrap_or(1024),
            temperature: self.options.temperature,
        };

        let response = execute(
            self.client
                .post(join_url(&self.endpoint, "/v1/messages"))
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&request),
            timeout,
        )
        .await?;
        let body: AnthropicResponse = decode(response, ProviderName::Claude, timeout).await?;

        // text blocks are concatenated; tool-use and other blocks carry no text
        let content: String = body
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect();

        Ok(Completion {
            text: require_text(ProviderName::Claude, content)?,
            usage: body
                .usage
                .map(|u| TokenUsage::new(u.input_tokens, u.output_tokens)),
        })
    }
}

#[async_trait]
impl ProviderClient for AnthropicAdapter {
    fn provider(&self) -> ProviderName {
        ProviderName::Claude
    }

    async fn send(
        &self,
        text: &str,
        api_key: Option<&str>,
        model: &str,
        timeout: Duration,
    ) -> ProviderResponse {
        let outcome = match require_key(ProviderName::Claude, api_key) {
            Ok(key) => self.complete(text, key, model, timeout).await,
            Err(e) => Err(e),
        };
        into_response(ProviderName::Claude, model, api_key, outcome)
    }
}
