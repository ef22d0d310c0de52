// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Transport contract
//!
//! One trait, two implementations (direct socket and managed API) living in
//! `crate::infrastructure::transport`. Callers depend only on this trait;
//! the registry entry's `transport_kind` picks the implementation.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Send/stream contract and transport failures

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;

use crate::domain::message::{AgentResponse, Message, ResponseFragment};
use crate::domain::registry::{RegistryEntry, TransportKind};

/// Per-call options the orchestrator attaches to a request but that are not
/// part of the message body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Do not continue any prior transport-level conversation.
    pub fresh_start: bool,
    /// Restoration block to inject as the first turn.
    pub resume_hint: Option<String>,
}

/// Lazy, ordered fragments of one agent's reply. Ends after a
/// [`ResponseFragment::Done`] or an error.
pub type FragmentStream = BoxStream<'static, Result<ResponseFragment, TransportError>>;

#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// One request, one complete response. Always bounded by a timeout.
    async fn send(
        &self,
        entry: &RegistryEntry,
        message: &Message,
        options: &SendOptions,
    ) -> Result<AgentResponse, TransportError>;

    /// One request, a lazy sequence of fragments. Each fragment wait is
    /// bounded by a timeout.
    async fn stream(
        &self,
        entry: &RegistryEntry,
        message: &Message,
        options: &SendOptions,
    ) -> Result<FragmentStream, TransportError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("agent '{agent}' is unreachable: {reason}")]
    Unreachable { agent: String, reason: String },

    #[error("agent '{agent}' timed out after {after:?}")]
    Timeout { agent: String, after: Duration },

    #[error("agent '{agent}' returned an error: {message}")]
    Agent { agent: String, message: String },

    #[error("protocol error talking to '{agent}': {message}")]
    Protocol { agent: String, message: String },

    #[error("no transport configured for {0}")]
    Unsupported(TransportKind),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}
