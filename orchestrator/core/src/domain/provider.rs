// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Provider
//!
//! Catalogue of supported LLM providers and the `(provider, credential)`
//! identity used to shard breaker and quota state.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Single source of truth for provider names and defaults

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::credential::CredentialFingerprint;

/// Supported LLM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderName {
    OpenAI,
    #[serde(alias = "anthropic")]
    Claude,
    #[serde(alias = "google")]
    Gemini,
    #[serde(alias = "xai")]
    Grok,
    Ollama,
}

impl ProviderName {
    /// All providers, in the canonical dispatch order
    pub const ALL: &'static [ProviderName] = &[
        ProviderName::OpenAI,
        ProviderName::Claude,
        ProviderName::Gemini,
        ProviderName::Grok,
        ProviderName::Ollama,
    ];

    /// Name as used in config files, the CLI and metric labels
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::Grok => "grok",
            Self::Ollama => "ollama",
        }
    }

    /// Human-facing name used in error messages
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::OpenAI => "OpenAI",
            Self::Claude => "Claude",
            Self::Gemini => "Gemini",
            Self::Grok => "Grok",
            Self::Ollama => "Ollama",
        }
    }

    pub const fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-4o-mini",
            Self::Claude => "claude-3-5-haiku-latest",
            Self::Gemini => "gemini-1.5-flash",
            Self::Grok => "grok-2-latest",
            Self::Ollama => "llama3.2",
        }
    }

    pub const fn default_endpoint(&self) -> &'static str {
        match self {
            Self::OpenAI => "https://api.openai.com/v1",
            Self::Claude => "https://api.anthropic.com",
            Self::Gemini => "https://generativelanguage.googleapis.com",
            Self::Grok => "https://api.x.ai",
            Self::Ollama => "http://localhost:11434",
        }
    }

    /// Effective input budget in tokens. Deliberately far below the
    /// advertised context windows so free-tier limits are respected.
    pub const fn default_context_tokens(&self) -> usize {
        match self {
            Self::OpenAI => 3_000,
            Self::Claude => 100_000,
            Self::Gemini => 30_000,
            Self::Grok => 25_000,
            Self::Ollama => 4_000,
        }
    }

    /// Environment variable conventionally holding the API key
    pub const fn api_key_env(&self) -> &'static str {
        match self {
            Self::OpenAI => "OPENAI_API_KEY",
            Self::Claude => "ANTHROPIC_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
            Self::Grok => "XAI_API_KEY",
            Self::Ollama => "OLLAMA_API_KEY",
        }
    }

    /// Local Ollama servers accept unauthenticated requests
    pub const fn requires_api_key(&self) -> bool {
        !matches!(self, Self::Ollama)
    }
}

impl FromStr for ProviderName {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let normalized = match lower.as_str() {
            "anthropic" => "claude",
            "google" => "gemini",
            "xai" | "x.ai" => "grok",
            other => other,
        };

        Self::ALL
            .iter()
            .find(|p| p.as_str() == normalized)
            .copied()
            .ok_or_else(|| UnknownProvider(s.to_string()))
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown provider: {0}. Supported: openai, claude, gemini, grok, ollama")]
pub struct UnknownProvider(pub String);

/// A provider paired with the fingerprint of the credential used against it.
///
/// Two users of the same provider with different keys get different
/// identities, so one failing key never trips the breaker for the other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderIdentity {
    pub provider: ProviderName,
    pub fingerprint: CredentialFingerprint,
}

impl ProviderIdentity {
    pub fn new(provider: ProviderName, fingerprint: CredentialFingerprint) -> Self {
        Self {
            provider,
            fingerprint,
        }
    }

    /// Identity for a raw key; the key itself is not retained
    pub fn from_api_key(provider: ProviderName, api_key: &str) -> Self {
        Self::new(provider, CredentialFingerprint::from_api_key(api_key))
    }

    /// Admission-control identifier for this identity
    pub fn rate_limit_key(&self) -> String {
        format!("{}:{}", self.provider, self.fingerprint)
    }
}

impl fmt::Display for ProviderIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.fingerprint.short())
    }
}
