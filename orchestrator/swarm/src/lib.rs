// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `chorus-swarm`: Team Chat
//!
//! Fans one message out to every registered agent (minus an exclusion set)
//! and merges the replies into a single attributed stream.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `BroadcastJob`, `BroadcastEvent`, `BroadcastOptions`, `TeamChatReport` |
//! | [`application`] | Application | `Dispatcher` seam, `BroadcastOrchestrator`, `BroadcastStream` |
//!
//! ## Key Concepts
//!
//! - **Terminal event**: every target ends with exactly one of `Delivered`,
//!   `TimedOut` or `Failed`. Streaming mode adds ordered `Fragment` events
//!   before it.
//! - **Job timeout**: optional cap on the whole fan-out. When it elapses the
//!   remaining targets are reported as timed out and their calls are
//!   cancelled.
//! - **Cancellation**: dropping a [`application::BroadcastStream`] stops
//!   every outstanding call.

pub mod domain;
pub mod application;

pub use domain::*;
