// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Pure types, contracts and errors. Nothing in here performs I/O.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Registry entries, messages, transport contract, token
//!   budgets, sundown state and configuration

pub mod registry;
pub mod message;
pub mod transport;
pub mod budget;
pub mod lifecycle;
pub mod events;
pub mod repository;
pub mod config;
pub mod error;

pub use error::{ChorusError, ErrorKind};
