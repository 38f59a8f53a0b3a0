// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Synchronous, I/O-free building blocks of the orchestration core.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Provider identity, resilience primitives, chunking and consensus

pub mod chunker;
pub mod circuit_breaker;
pub mod config;
pub mod consensus;
pub mod credential;
pub mod llm;
pub mod provider;
pub mod rate_limiter;
pub mod tokens;
