// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Message contract shared by every transport.
//!
//! Headers travel alongside the body on the wire but are stripped by the
//! agent SDK before application code sees the payload.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

pub const HEADER_SOURCE: &str = "x-chorus-source";
pub const HEADER_DESTINATION: &str = "x-chorus-destination";
pub const HEADER_BROADCAST_ID: &str = "x-chorus-broadcast-id";
pub const HEADER_PURPOSE: &str = "x-chorus-purpose";
pub const HEADER_PRIORITY: &str = "x-chorus-priority";

/// Where a message is going.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Destination {
    Agent(String),
    Broadcast,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Agent(name) => write!(f, "{}", name),
            Destination::Broadcast => write!(f, "*"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub source: String,
    pub destination: Destination,
    pub body: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Message {
    pub fn new(source: impl Into<String>, destination: Destination, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            destination,
            body: body.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn to_agent(source: impl Into<String>, agent: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(source, Destination::Agent(agent.into()), body)
    }

    pub fn broadcast(source: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(source, Destination::Broadcast, body)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Copy of this message addressed to a single agent with routing headers
    /// filled in. The copy gets a fresh id.
    pub fn addressed_to(&self, agent: &str) -> Message {
        let mut copy = self.clone();
        copy.id = Uuid::new_v4();
        copy.destination = Destination::Agent(agent.to_string());
        copy.headers
            .insert(HEADER_SOURCE.to_string(), self.source.clone());
        copy.headers
            .insert(HEADER_DESTINATION.to_string(), agent.to_string());
        copy
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

/// Token counts reported by an agent for one exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// A complete reply from one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub agent: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

/// One piece of a streamed reply. Fragments from one agent arrive in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFragment {
    Chunk { index: u32, content: String },
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<TokenUsage>,
    },
}

impl ResponseFragment {
    pub fn is_done(&self) -> bool {
        matches!(self, ResponseFragment::Done { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addressed_copy_carries_routing_headers() {
        let message = Message::broadcast("operator", "ping").with_header(HEADER_PRIORITY, "high");
        let copy = message.addressed_to("alpha");

        assert_ne!(copy.id, message.id);
        assert_eq!(copy.destination, Destination::Agent("alpha".to_string()));
        assert_eq!(copy.header(HEADER_SOURCE), Some("operator"));
        assert_eq!(copy.header(HEADER_DESTINATION), Some("alpha"));
        assert_eq!(copy.header(HEADER_PRIORITY), Some("high"));
        assert_eq!(copy.body, "ping");
    }

    #[test]
    fn test_usage_total() {
        let usage = TokenUsage { input_tokens: 120, output_tokens: 30 };
        assert_eq!(usage.total(), 150);
    }
}
