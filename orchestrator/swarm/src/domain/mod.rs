// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Broadcast Domain Layer
//!
//! Pure types for one team-chat round. No I/O dependencies.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`broadcast`] | `BroadcastJob`, `BroadcastEvent`, `BroadcastOptions`, `TeamChatReport` |

pub mod broadcast;

pub use broadcast::*;
