// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `chorus-core`
//!
//! Registry, messaging and context-lifecycle layer shared by every Chorus
//! component.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain types and errors ([`domain`]), file/socket/HTTP
//!   adapters ([`infrastructure`]) and the use-case services that wire them
//!   together ([`application`]).

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
