// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Broadcast use cases.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** The [`Dispatcher`] seam the orchestrator sends through and
//!   its production implementation on [`AgentMessenger`]

pub mod orchestrator;

pub use orchestrator::{BroadcastOrchestrator, BroadcastStream};

use async_trait::async_trait;
use chorus_core::application::AgentMessenger;
use chorus_core::domain::error::ChorusError;
use chorus_core::domain::message::{AgentResponse, Message};
use chorus_core::domain::transport::FragmentStream;
use std::collections::HashSet;

/// Resolves broadcast targets and delivers a copy of the message to each.
///
/// The production implementation is [`AgentMessenger`], so every copy goes
/// through the same budget and lifecycle path as a direct message.
/// `send` and `stream` return once the reply is in; per-target deadlines
/// bound only the exchange itself.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Names of every live agent not in `exclude`.
    async fn targets(&self, exclude: &HashSet<String>) -> Result<Vec<String>, ChorusError>;

    async fn send(&self, target: &str, message: &Message) -> Result<AgentResponse, ChorusError>;

    async fn stream(&self, target: &str, message: &Message) -> Result<FragmentStream, ChorusError>;

    /// Waits for work a delivery left running after its reply, such as an
    /// automatic sundown.
    async fn settle(&self) {}
}

#[async_trait]
impl Dispatcher for AgentMessenger {
    async fn targets(&self, exclude: &HashSet<String>) -> Result<Vec<String>, ChorusError> {
        let resolved = self.discovery().resolve_all(exclude).await?;
        Ok(resolved.into_iter().map(|agent| agent.entry.name).collect())
    }

    async fn send(&self, target: &str, message: &Message) -> Result<AgentResponse, ChorusError> {
        self.send_detached(target, message).await
    }

    async fn stream(&self, target: &str, message: &Message) -> Result<FragmentStream, ChorusError> {
        self.stream_detached(target, message).await
    }

    async fn settle(&self) {
        AgentMessenger::settle(self).await
    }
}
