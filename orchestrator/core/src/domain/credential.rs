// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Credential Fingerprinting
//!
//! One-way hashing of API keys into lookup keys, plus scrubbing of key
//! material out of error text before it leaves a provider call.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Keep raw credentials out of registries, logs and responses

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::LazyLock;

const REDACTED: &str = "[REDACTED]";

static QUERY_SECRET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(key|api_key|apikey|access_token|token)=[^&\s'\x22]+")
        .expect("query secret pattern is valid")
});

static BEARER_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)bearer\s+[A-Za-z0-9._~+/=\-]+").expect("bearer pattern is valid")
});

static PROVIDER_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(sk-ant-|sk-|xai-|AIza)[A-Za-z0-9_\-]{8,}").expect("key pattern is valid")
});

/// Stable, non-reversible fingerprint of a credential (hex SHA-256)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialFingerprint(String);

impl CredentialFingerprint {
    pub fn from_api_key(api_key: &str) -> Self {
        let digest = Sha256::digest(api_key.as_bytes());
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 hex characters, safe for logs
    pub fn short(&self) -> &str {
        let end = self.0.len().min(8);
        &self.0[..end]
    }
}

impl fmt::Display for CredentialFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Caller identifiers for admission control at the HTTP boundary
pub struct RateLimitKey;

impl RateLimitKey {
    pub fn for_api_key(api_key: &str) -> String {
        format!("key:{}", CredentialFingerprint::from_api_key(api_key))
    }

    /// Fallback identifier for anonymous callers
    pub fn for_client(ip: &str, user_agent: &str) -> String {
        let digest = Sha256::digest(format!("{ip}|{user_agent}").as_bytes());
        format!("client:{}", hex::encode(digest))
    }
}

/// Identifier safe to log: every fingerprint segment is cut to 8 hex chars
/// (`openai:3f2a9c1d…` becomes `openai:3f2a9c1d`)
pub fn loggable_identifier(identifier: &str) -> String {
    identifier
        .split(':')
        .map(|segment| {
            if segment.len() > 8 && segment.chars().all(|c| c.is_ascii_hexdigit()) {
                &segment[..8]
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join(":")
}

/// Strip key material from a message.
///
/// Removes the literal `secret` when given, then anything shaped like a
/// query-string credential, bearer token or well-known provider key prefix.
pub fn redact(message: &str, secret: Option<&str>) -> String {
    let mut cleaned = match secret {
        Some(secret) if !secret.is_empty() => message.replace(secret, REDACTED),
        _ => message.to_string(),
    };

    cleaned = QUERY_SECRET
        .replace_all(&cleaned, format!("$1={REDACTED}").as_str())
        .into_owned();
    cleaned = BEARER_TOKEN
        .replace_all(&cleaned, format!("Bearer {REDACTED}").as_str())
        .into_owned();
    PROVIDER_KEY.replace_all(&cleaned, REDACTED).into_owned()
}
