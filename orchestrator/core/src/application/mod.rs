// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod analysis;
pub mod guard;
pub mod orchestrator;

// Re-export use cases for convenience
pub use analysis::{AnalysisOutcome, AnalysisService, StandardAnalysisService};
pub use guard::guarded_call;
pub use orchestrator::{ChunkInfo, Orchestrator, OrchestratorError, ProviderRequest, RunOutcome};
