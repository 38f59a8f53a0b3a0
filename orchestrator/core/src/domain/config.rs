// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Orchestrator Configuration
//
// Defines the configuration schema for a concord deployment:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - LLM provider list (credentials, models, context budgets)
// - Circuit breaker, rate limit, orchestration and chunking tuning
// - Network and observability settings

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::chunker::DEFAULT_OVERLAP_CHARS;
use crate::domain::circuit_breaker::{
    CircuitBreakerConfig, DEFAULT_FAILURE_THRESHOLD, DEFAULT_RESET_TIMEOUT,
};
use crate::domain::provider::ProviderName;
use crate::domain::rate_limiter::RateLimitConfig;
use crate::domain::tokens::{ContextBudget, DEFAULT_BUDGET_RATIO, DEFAULT_CHARS_PER_TOKEN};

pub const API_VERSION: &str = "concord/v1";
pub const KIND: &str = "OrchestratorConfig";

/// Top-level Kubernetes-style configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfigManifest {
    /// API version (must be "concord/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "OrchestratorConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: OrchestratorConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Deployment name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Content under `spec:`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfigSpec {
    /// Providers in dispatch order
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    #[serde(default)]
    pub orchestration: OrchestrationSettings,

    #[serde(default)]
    pub chunking: ChunkingSettings,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: ProviderName,

    /// API base URL. Defaults to the provider's public endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// API key (supports "env:VAR_NAME" for environment variables).
    /// When absent, the provider's conventional variable is consulted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Passed through to the provider unvalidated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Effective input budget override, in estimated tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_tokens: Option<usize>,
}

impl ProviderConfig {
    pub fn new(name: ProviderName) -> Self {
        Self {
            name,
            endpoint: None,
            api_key: None,
            model: None,
            enabled: true,
            context_tokens: None,
        }
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint
            .as_deref()
            .unwrap_or_else(|| self.name.default_endpoint())
    }

    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.name.default_model())
    }

    pub fn context_tokens(&self) -> usize {
        self.context_tokens
            .unwrap_or_else(|| self.name.default_context_tokens())
    }

    /// Resolve the key: "env:VAR" reads VAR, a literal is used as-is and
    /// an absent key falls back to the provider's conventional variable.
    /// Unset or empty values resolve to `None`.
    pub fn resolve_api_key(&self) -> Option<String> {
        let resolved = match self.api_key.as_deref() {
            Some(key) => match key.strip_prefix("env:") {
                Some(var_name) => {
                    let value = std::env::var(var_name).ok();
                    if value.is_none() {
                        tracing::warn!(
                            provider = %self.name,
                            "Environment variable not set: {}",
                            var_name
                        );
                    }
                    value
                }
                None => Some(key.to_string()),
            },
            None => std::env::var(self.name.api_key_env()).ok(),
        };
        resolved.filter(|key| !key.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_reset_timeout_secs")]
    pub reset_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Applied per provider credential and to ordinary API callers
    #[serde(default = "RateLimitConfig::standard")]
    pub primary: RateLimitConfig,

    /// Applied to callers without an API key
    #[serde(default = "RateLimitConfig::strict")]
    pub strict: RateLimitConfig,

    /// How often idle identifiers are evicted
    #[serde(default = "default_idle_sweep_interval")]
    pub idle_sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationSettings {
    #[serde(default = "default_per_call_timeout")]
    pub per_call_timeout_secs: u64,

    /// Upper bound on provider calls in flight at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,

    /// Pause before dispatch when more than one provider is active
    #[serde(default = "default_stagger_delay")]
    pub stagger_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingSettings {
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,

    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,

    /// Fraction of a provider budget actually filled (0, 1]
    #[serde(default = "default_budget_ratio")]
    pub budget_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Expose a Prometheus scrape endpoint from `concord serve`
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

fn default_reset_timeout_secs() -> u64 {
    DEFAULT_RESET_TIMEOUT.as_secs()
}

fn default_idle_sweep_interval() -> u64 {
    3600
}

fn default_per_call_timeout() -> u64 {
    30
}

fn default_max_concurrent() -> usize {
    5
}

fn default_stagger_delay() -> u64 {
    500
}

fn default_overlap_chars() -> usize {
    DEFAULT_OVERLAP_CHARS
}

fn default_chars_per_token() -> usize {
    DEFAULT_CHARS_PER_TOKEN
}

fn default_budget_ratio() -> f64 {
    DEFAULT_BUDGET_RATIO
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_secs: default_reset_timeout_secs(),
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            primary: RateLimitConfig::standard(),
            strict: RateLimitConfig::strict(),
            idle_sweep_interval_secs: default_idle_sweep_interval(),
        }
    }
}

impl Default for OrchestrationSettings {
    fn default() -> Self {
        Self {
            per_call_timeout_secs: default_per_call_timeout(),
            max_concurrent_requests: default_max_concurrent(),
            stagger_delay_ms: default_stagger_delay(),
        }
    }
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            overlap_chars: default_overlap_chars(),
            chars_per_token: default_chars_per_token(),
            budget_ratio: default_budget_ratio(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Default for OrchestratorConfigSpec {
    /// Every hosted provider enabled with keys from their conventional
    /// environment variables; the local Ollama server is opt-in.
    fn default() -> Self {
        let providers = ProviderName::ALL
            .iter()
            .map(|name| ProviderConfig {
                enabled: name.requires_api_key(),
                ..ProviderConfig::new(*name)
            })
            .collect();

        Self {
            providers,
            circuit_breaker: CircuitBreakerSettings::default(),
            rate_limit: RateLimitSettings::default(),
            orchestration: OrchestrationSettings::default(),
            chunking: ChunkingSettings::default(),
            network: NetworkConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Default for OrchestratorConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "concord".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: OrchestratorConfigSpec::default(),
        }
    }
}

impl OrchestratorConfigSpec {
    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker.failure_threshold,
            reset_timeout: Duration::from_secs(self.circuit_breaker.reset_timeout_secs),
        }
    }

    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_secs(self.orchestration.per_call_timeout_secs)
    }

    pub fn stagger_delay(&self) -> Duration {
        Duration::from_millis(self.orchestration.stagger_delay_ms)
    }

    pub fn provider(&self, name: ProviderName) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }

    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.iter().filter(|p| p.enabled)
    }

    /// Context budget for a provider, honouring per-provider overrides
    pub fn context_budget(&self, name: ProviderName) -> ContextBudget {
        let max_tokens = self
            .provider(name)
            .map(ProviderConfig::context_tokens)
            .unwrap_or_else(|| name.default_context_tokens());
        ContextBudget::new(max_tokens)
            .with_ratio(self.chunking.chars_per_token, self.chunking.budget_ratio)
    }
}

impl OrchestratorConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::from_yaml_str(&content).with_context(|| format!("Failed to parse config file {:?}", path))
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. CONCORD_CONFIG_PATH environment variable
    /// 2. ./concord-config.yaml (working directory)
    /// 3. ~/.concord/config.yaml (user home)
    /// 4. /etc/concord/config.yaml (system, Unix) or C:\ProgramData\Concord\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("CONCORD_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./concord-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".concord").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/concord/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Concord\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let mut config = match Self::discover_config() {
            Some(config_path) => {
                tracing::info!("Loading configuration from discovered path: {:?}", config_path);
                Self::from_yaml_file(config_path)?
            }
            None => {
                tracing::debug!("No configuration file found in standard locations. Using defaults.");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Some(secs) = env_override::<u64>("CONCORD_PER_CALL_TIMEOUT_SECS") {
            self.spec.orchestration.per_call_timeout_secs = secs;
        }
        if let Ok(level) = std::env::var("CONCORD_LOG_LEVEL") {
            tracing::info!("Environment override: CONCORD_LOG_LEVEL={}", level);
            self.spec.observability.logging.level = level;
        }
        if let Some(port) = env_override::<u16>("CONCORD_PORT") {
            self.spec.network.port = port;
        }
        if let Some(delay) = env_override::<u64>("CONCORD_STAGGER_DELAY_MS") {
            self.spec.orchestration.stagger_delay_ms = delay;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.trim().is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let spec = &self.spec;
        let mut seen = HashSet::new();
        for provider in &spec.providers {
            if !seen.insert(provider.name) {
                anyhow::bail!("Duplicate provider: {}", provider.name);
            }
            if provider.enabled && provider.endpoint().trim().is_empty() {
                anyhow::bail!("Provider endpoint cannot be empty for: {}", provider.name);
            }
            if provider.context_tokens == Some(0) {
                anyhow::bail!("context_tokens must be positive for: {}", provider.name);
            }
        }

        if spec.circuit_breaker.failure_threshold == 0 {
            anyhow::bail!("circuit_breaker.failure_threshold must be at least 1");
        }
        if spec.circuit_breaker.reset_timeout_secs == 0 {
            anyhow::bail!("circuit_breaker.reset_timeout_secs must be positive");
        }

        for (label, limits) in [
            ("primary", &spec.rate_limit.primary),
            ("strict", &spec.rate_limit.strict),
        ] {
            if limits.requests_per_minute == 0
                || limits.requests_per_hour == 0
                || limits.requests_per_day == 0
            {
                anyhow::bail!("rate_limit.{} limits must be positive", label);
            }
            if limits.burst_size == 0 {
                anyhow::bail!("rate_limit.{}.burst_size must be positive", label);
            }
        }
        if spec.rate_limit.idle_sweep_interval_secs == 0 {
            anyhow::bail!("rate_limit.idle_sweep_interval_secs must be positive");
        }

        if spec.orchestration.per_call_timeout_secs == 0 {
            anyhow::bail!("orchestration.per_call_timeout_secs must be positive");
        }
        if spec.orchestration.max_concurrent_requests == 0 {
            anyhow::bail!("orchestration.max_concurrent_requests must be positive");
        }

        if spec.chunking.chars_per_token == 0 {
            anyhow::bail!("chunking.chars_per_token must be positive");
        }
        let ratio = spec.chunking.budget_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            anyhow::bail!("chunking.budget_ratio must be in (0, 1], got {}", ratio);
        }

        if !matches!(spec.observability.logging.format.as_str(), "text" | "json") {
            anyhow::bail!(
                "observability.logging.format must be 'text' or 'json', got '{}'",
                spec.observability.logging.format
            );
        }

        Ok(())
    }
}

fn env_override<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => {
            tracing::info!("Environment override: {}={}", name, raw);
            Some(value)
        }
        Err(_) => {
            tracing::warn!("Invalid value for {}: '{}'. Ignoring.", name, raw);
            None
        }
    }
}
