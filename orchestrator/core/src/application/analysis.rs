// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Analysis use case: one orchestration run followed by consensus analysis.
// This is what POST /api/analyze and `concord analyze` execute.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use uuid::Uuid;

use crate::application::orchestrator::{ChunkInfo, Orchestrator, OrchestratorError, ProviderRequest};
use crate::domain::consensus::{ConsensusAnalyzer, ConsensusResult};
use crate::domain::llm::ProviderResponse;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub request_id: Uuid,
    pub responses: Vec<ProviderResponse>,
    pub chunked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_info: Option<ChunkInfo>,
    pub consensus: ConsensusResult,
    pub duration_ms: u64,
}

#[async_trait]
pub trait AnalysisService: Send + Sync {
    async fn analyze(
        &self,
        text: &str,
        providers: &[ProviderRequest],
        per_call_timeout: Duration,
    ) -> Result<AnalysisOutcome, OrchestratorError>;
}

pub struct StandardAnalysisService {
    orchestrator: Arc<Orchestrator>,
    analyzer: ConsensusAnalyzer,
}

impl StandardAnalysisService {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            analyzer: ConsensusAnalyzer::new(),
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }
}

#[async_trait]
impl AnalysisService for StandardAnalysisService {
    async fn analyze(
        &self,
        text: &str,
        providers: &[ProviderRequest],
        per_call_timeout: Duration,
    ) -> Result<AnalysisOutcome, OrchestratorError> {
        let request_id = Uuid::new_v4();
        let started = Instant::now();

        let run = self.orchestrator.run(text, providers, per_call_timeout).await?;
        let analyzer = self.analyzer;
        let responses = run.responses;
        let (responses, consensus) = tokio::task::spawn_blocking(move || {
            let consensus = analyzer.analyze(&responses);
            (responses, consensus)
        })
        .await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        info!(
            request_id = %request_id,
            models = consensus.models_analyzed,
            agreement = consensus.agreement_level,
            has_consensus = consensus.has_consensus,
            conflicts = consensus.conflicts.len(),
            duration_ms,
            "Analysis complete"
        );

        Ok(AnalysisOutcome {
            request_id,
            responses,
            chunked: run.chunked,
            chunk_info: run.chunk_info,
            consensus,
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::circuit_breaker::CircuitBreakerRegistry;
    use crate::domain::llm::ProviderClient;
    use crate::domain::provider::ProviderName;
    use crate::domain::rate_limiter::RateLimiter;
    use crate::infrastructure::llm::ProviderRegistry;

    struct Fixed(ProviderName, &'static str);

    #[async_trait]
    impl ProviderClient for Fixed {
        fn provider(&self) -> ProviderName {
            self.0
        }

        async fn send(&self, _: &str, _: Option<&str>, model: &str, _: Duration) -> ProviderResponse {
            ProviderResponse::success(self.0, model, self.1, None)
        }
    }

    fn service(a: &'static str, b: &'static str) -> StandardAnalysisService {
        let registry = ProviderRegistry::new()
            .with_client(Arc::new(Fixed(ProviderName::OpenAI, a)))
            .with_client(Arc::new(Fixed(ProviderName::Claude, b)));
        let orchestrator = Orchestrator::new(
            Arc::new(registry),
            Arc::new(CircuitBreakerRegistry::default()),
            Arc::new(RateLimiter::default()),
        )
        .with_stagger_delay(Duration::ZERO);
        StandardAnalysisService::new(Arc::new(orchestrator))
    }

    fn both() -> Vec<ProviderRequest> {
        vec![
            ProviderRequest::new(ProviderName::OpenAI).with_api_key("sk-a"),
            ProviderRequest::new(ProviderName::Claude).with_api_key("sk-b"),
        ]
    }

    #[tokio::test]
    async fn test_agreeing_models_reach_consensus() {
        let outcome = service("X is risky", "X is risky too")
            .analyze("Is X risky?", &both(), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(outcome.responses.len(), 2);
        assert_eq!(outcome.consensus.models_analyzed, 2);
        assert!(outcome.consensus.has_consensus);
        assert!(!outcome.chunked);
    }

    #[tokio::test]
    async fn test_contradicting_models_conflict() {
        let outcome = service("Yes", "No")
            .analyze("Is X risky?", &both(), Duration::from_secs(5))
            .await
            .unwrap();

        assert!(!outcome.consensus.has_consensus);
        assert!(!outcome.consensus.conflicts.is_empty());
    }

    #[tokio::test]
    async fn test_serialized_outcome_shape() {
        let outcome = service("Yes", "Yes")
            .analyze("q", &both(), Duration::from_secs(5))
            .await
            .unwrap();

        let json = serde_json::to_value(&outcome).unwrap();
        assert!(json["request_id"].is_string());
        assert_eq!(json["responses"].as_array().unwrap().len(), 2);
        assert!(json.get("chunk_info").is_none());
        // keys given in the request are never echoed back
        assert!(!json.to_string().contains("sk-a"));
    }
}
