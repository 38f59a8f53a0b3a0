// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Gemini LLM Provider Adapter
//
// Anti-Corruption Layer for the Google Generative Language API.
// The key travels in the x-goog-api-key header rather than the query
// string so it never shows up in transport error messages.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{decode, execute, into_response, join_url, require_key, require_text, Completion};
use crate::domain::llm::{GenerationOptions, LLMError, ProviderClient, ProviderResponse, TokenUsage};
use crate::domain::provider::ProviderName;

pub struct GeminiAdapter {
    client: reqwest::Client,
    endpoint: String,
    options: GenerationOptions,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

impl GeminiAdapter {
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
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: self.options.max_tokens,
                temperature: self.options.temperature,
            },
        };

        let path = format!("/v1beta/models/{model}:generateContent");
        let response = execute(
            self.client
                .post(join_url(&self.endpoint, &path))
                .header("x-goog-api-key", api_key)
                .json(&request),
            timeout,
        )
        .await?;
        let body: GenerateResponse = decode(response, ProviderName::Gemini, timeout).await?;

        let content: String = body
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        Ok(Completion {
            text: require_text(ProviderName::Gemini, content)?,
            usage: body
                .usage_metadata
                .map(|u| TokenUsage::new(u.prompt_token_count, u.candidates_token_count)),
        })
    }
}

#[async_trait]
impl ProviderClient for GeminiAdapter {
    fn provider(&self) -> ProviderName {
        ProviderName::Gemini
    }

    async fn send(
        &self,
        text: &str,
        api_key: Option<&str>,
        model: &str,
        timeout: Duration,
    ) -> ProviderResponse {
        let outcome = match require_key(ProviderName::Gemini, api_key) {
            Ok(key) => self.complete(text, key, model, timeout).await,
            Err(e) => Err(e),
        };
        into_response(ProviderName::Gemini, model, api_key, outcome)
    }
}
