// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Wire records
//!
//! Newline-delimited JSON records exchanged with agents. The socket transport
//! frames [`WireRequest`] / [`WireReply`] one per line; the managed API takes
//! a [`ChatRequest`] body and answers with a [`ManagedReply`] (or an NDJSON
//! body of stream records when streaming).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::message::{Message, TokenUsage};
use crate::domain::transport::{SendOptions, TransportError};

/// Longest accepted line, in bytes.
pub const MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default = "Uuid::new_v4")]
    pub request_id: Uuid,
    pub content: String,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub fresh_start: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_hint: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl ChatRequest {
    pub fn from_message(message: &Message, options: &SendOptions, stream: bool) -> Self {
        Self {
            request_id: message.id,
            content: message.body.clone(),
            stream,
            fresh_start: options.fresh_start,
            resume_hint: options.resume_hint.clone(),
            headers: message.headers.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireRequest {
    Chat(ChatRequest),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireReply {
    ChatResponse {
        #[serde(alias = "response")]
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<TokenUsage>,
    },
    StreamStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    StreamChunk {
        content: String,
    },
    StreamEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<TokenUsage>,
    },
    StreamError {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Managed-API reply body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedReply {
    #[serde(alias = "response")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

pub fn parse_reply(agent: &str, line: &str) -> Result<WireReply, TransportError> {
    serde_json::from_str(line).map_err(|e| TransportError::Protocol {
        agent: agent.to_string(),
        message: format!("malformed reply record: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_record_shape() {
        let message = Message::to_agent("operator", "alpha", "hello");
        let options = SendOptions {
            fresh_start: true,
            resume_hint: None,
        };
        let record = WireRequest::Chat(ChatRequest::from_message(&message, &options, false));
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["type"], "chat");
        assert_eq!(value["content"], "hello");
        assert_eq!(value["fresh_start"], true);
        assert!(value.get("resume_hint").is_none());
    }

    #[test]
    fn test_reply_accepts_response_alias() {
        let reply = parse_reply("alpha", r#"{"type":"chat_response","response":"pong","ai_id":"alpha"}"#)
            .unwrap();
        assert_eq!(
            reply,
            WireReply::ChatResponse {
                content: "pong".to_string(),
                model: None,
                usage: None
            }
        );
    }

    #[test]
    fn test_minimal_request_gets_an_id() {
        let record: WireRequest = serde_json::from_str(r#"{"type":"chat","content":"hi"}"#).unwrap();
        let WireRequest::Chat(request) = record;
        assert_eq!(request.content, "hi");
        assert!(!request.stream);
        assert!(!request.request_id.is_nil());
    }

    #[test]
    fn test_malformed_reply_is_a_protocol_error() {
        let err = parse_reply("alpha", "not json").unwrap_err();
        assert!(matches!(err, TransportError::Protocol { .. }));
    }
}
