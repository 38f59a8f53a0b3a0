// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`concord-core`)
//!
//! HTTP surface that translates external requests into application service
//! calls. No orchestration logic lives here; handlers delegate to
//! `crate::application`.
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`api`] | HTTP (Axum) | Analysis endpoint, circuit breaker inspection, health |

pub mod api;
