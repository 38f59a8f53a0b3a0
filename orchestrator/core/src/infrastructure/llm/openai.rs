// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// OpenAI LLM Provider Adapter
//
// Anti-Corruption Layer for the OpenAI chat completions API.
// The request/response types are shared with other OpenAI-compatible
// providers (see grok.rs).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{decode, execute, into_response, join_url, require_key, require_text, Completion};
use crate::domain::llm::{GenerationOptions, LLMError, ProviderClient, ProviderResponse, TokenUsage};
use crate::domain::provider::ProviderName;

pub struct OpenAIAdapter {
    client: reqwest::Client,
    endpoint: String,
    options: GenerationOptions,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

/// One chat completion against any OpenAI-compatible endpoint
pub(super) async fn chat_completion(
    client: &reqwest::Client,
    provider: ProviderName,
    url: &str,
    api_key: &str,
    model: &str,
    text: &str,
    options: &GenerationOptions,
    timeout: Duration,
) -> Result<Completion, LLMError> {
    let request = ChatRequest {
        model,
        messages: vec![ChatMessage {
            role: "user",
            content: text,
        }],
        max_tokens: options.max_tokens,
        temperature: options.temperature,
    };

    let response = execute(
        client.post(url).bearer_auth(api_key).json(&request),
        timeout,
    )
    .await?;
    let body: ChatResponse = decode(response, provider, timeout).await?;

    let content = body
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .unwrap_or_default();

    Ok(Completion {
        text: require_text(provider, content)?,
        usage: body.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
    })
}

impl OpenAIAdapter {
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
impl ProviderClient for OpenAIAdapter {
    fn provider(&self) -> ProviderName {
        ProviderName::OpenAI
    }

    async fn send(
        &self,
        text: &str,
        api_key: Option<&str>,
        model: &str,
        timeout: Duration,
    ) -> ProviderResponse {
        let outcome = match require_key(ProviderName::OpenAI, api_key) {
            Ok(key) => {
                let url = join_url(&self.endpoint, "/chat/completions");
                chat_completion(
                    &self.client,
                    ProviderName::OpenAI,
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
        into_response(ProviderName::OpenAI, model, api_key, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use tokio::net::TcpListener;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_success_extracts_first_choice() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model": "gpt-4o-mini",
                "messages": [{"role": "user", "content": "Is water wet?"}]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"choices":[{"message":{"role":"assistant","content":"Yes."},"finish_reason":"stop"}],
                    "usage":{"prompt_tokens":5,"completion_tokens":2,"total_tokens":7}}"#,
            )
            .create_async()
            .await;

        let adapter = OpenAIAdapter::new(server.url());
        let response = adapter
            .send("Is water wet?", Some("sk-test"), "gpt-4o-mini", TIMEOUT)
            .await;

        mock.assert_async().await;
        assert_eq!(response.response_text(), "Yes.");
        assert!(response.error().is_none());
        assert_eq!(response.token_usage().unwrap().total_tokens, 7);
        assert_eq!(response.model(), "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_missing_key_makes_no_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let adapter = OpenAIAdapter::new(server.url());
        let response = adapter.send("hi", None, "gpt-4o-mini", TIMEOUT).await;

        mock.assert_async().await;
        assert_eq!(response.error(), Some("OpenAI API key not provided"));
        assert_eq!(response.response_text(), "");
    }

    #[tokio::test]
    async fn test_non_2xx_reports_status_without_key() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body(r#"{"error":{"message":"Incorrect API key provided: sk-secret-123456"}}"#)
            .create_async()
            .await;

        let adapter = OpenAIAdapter::new(server.url());
        let response = adapter
            .send("hi", Some("sk-secret-123456"), "gpt-4o-mini", TIMEOUT)
            .await;

        assert_eq!(response.error(), Some("API error: 401"));
    }

    #[tokio::test]
    async fn test_unparseable_body_is_invalid_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let adapter = OpenAIAdapter::new(server.url());
        let response = adapter.send("hi", Some("sk-test"), "m", TIMEOUT).await;
        assert!(response.error().unwrap().starts_with("Invalid response from OpenAI"));
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        // accepts connections but never answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let adapter = OpenAIAdapter::new(format!("http://{addr}"));
        let response = adapter
            .send("hi", Some("sk-test"), "m", Duration::from_millis(200))
            .await;

        assert_eq!(response.error(), Some("Request timeout (0.2s)"));
    }
}
