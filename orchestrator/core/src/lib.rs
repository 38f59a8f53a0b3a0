// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # concord-core
//!
//! Resilient multi-provider LLM orchestration: one input text is fanned out
//! to several hosted or local models, each call guarded by a per-credential
//! circuit breaker and rate limiter, and the answers are reduced to a
//! consensus / conflict summary.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - [`domain`]: breakers, rate limiting, chunking, consensus, configuration
//! - [`application`]: guarded calls, the orchestrator and the analysis use case
//! - [`infrastructure`]: provider adapters
//! - [`presentation`]: HTTP router

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
