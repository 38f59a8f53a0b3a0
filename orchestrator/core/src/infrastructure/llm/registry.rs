// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// LLM Provider Registry - Provider Name to Client Resolution
//
// Holds one ProviderClient per provider. Built from configuration with a
// single shared HTTP connection pool; tests inject their own clients.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::anthropic::AnthropicAdapter;
use super::gemini::GeminiAdapter;
use super::grok::GrokAdapter;
use super::ollama::OllamaAdapter;
use super::openai::OpenAIAdapter;
use crate::domain::config::OrchestratorConfigSpec;
use crate::domain::llm::ProviderClient;
use crate::domain::provider::ProviderName;

struct RegisteredProvider {
    client: Arc<dyn ProviderClient>,
    endpoint: String,
}

/// Registry for resolving a provider name to the client that talks to it
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderName, RegisteredProvider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an adapter for every known provider, using the configured
    /// endpoint where one is given and the published default otherwise.
    ///
    /// Disabled providers still get a client: `enabled` only decides which
    /// providers a caller asks for by default.
    pub fn from_config(spec: &OrchestratorConfigSpec) -> Self {
        let http = reqwest::Client::new();
        let mut registry = Self::new();

        info!("Initializing LLM provider registry");

        for &name in ProviderName::ALL {
            let endpoint = spec
                .provider(name)
                .map(|config| config.endpoint().to_string())
                .unwrap_or_else(|| name.default_endpoint().to_string());

            debug!(provider = %name, endpoint = %endpoint, "Registering provider adapter");

            let client: Arc<dyn ProviderClient> = match name {
                ProviderName::OpenAI => Arc::new(OpenAIAdapter::with_client(http.clone(), endpoint.clone())),
                ProviderName::Claude => Arc::new(AnthropicAdapter::with_client(http.clone(), endpoint.clone())),
                ProviderName::Gemini => Arc::new(GeminiAdapter::with_client(http.clone(), endpoint.clone())),
                ProviderName::Grok => Arc::new(GrokAdapter::with_client(http.clone(), endpoint.clone())),
                ProviderName::Ollama => Arc::new(OllamaAdapter::with_client(http.clone(), endpoint.clone())),
            };
            registry.insert(client, endpoint);
        }

        registry
    }

    /// Register (or replace) the client for `client.provider()`
    pub fn register(&mut self, client: Arc<dyn ProviderClient>) {
        let endpoint = client.provider().default_endpoint().to_string();
        self.insert(client, endpoint);
    }

    /// Builder form of [`register`](Self::register)
    pub fn with_client(mut self, client: Arc<dyn ProviderClient>) -> Self {
        self.register(client);
        self
    }

    fn insert(&mut self, client: Arc<dyn ProviderClient>, endpoint: String) {
        let name = client.provider();
        self.providers
            .insert(name, RegisteredProvider { client, endpoint });
    }

    pub fn get(&self, name: ProviderName) -> Option<Arc<dyn ProviderClient>> {
        self.providers.get(&name).map(|entry| Arc::clone(&entry.client))
    }

    /// Endpoint the provider's client was built against
    pub fn endpoint(&self, name: ProviderName) -> Option<&str> {
        self.providers.get(&name).map(|entry| entry.endpoint.as_str())
    }

    pub fn contains(&self, name: ProviderName) -> bool {
        self.providers.contains_key(&name)
    }

    /// Registered providers in catalogue order
    pub fn providers(&self) -> Vec<ProviderName> {
        ProviderName::ALL
            .iter()
            .copied()
            .filter(|name| self.providers.contains_key(name))
            .collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}
