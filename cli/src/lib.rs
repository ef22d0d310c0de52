// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Chorus CLI library - exposes testable components
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Operator commands over the shared registry, the sundown
//!   store and the broadcast orchestrator, plus the exit-code mapping

pub mod commands;
pub mod exit;
