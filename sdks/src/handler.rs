// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::Result;
use async_trait::async_trait;
use chorus_core::domain::message::TokenUsage;
use chorus_core::infrastructure::transport::wire::ChatRequest;
use futures::stream::{BoxStream, StreamExt};
use uuid::Uuid;

/// A request as the agent's own logic sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub request_id: Uuid,
    pub content: String,
    /// Do not continue any conversation state kept from earlier requests.
    pub fresh_start: bool,
    /// Notes this agent wrote at its last sundown, to be read before
    /// `content`.
    pub resume_hint: Option<String>,
}

impl From<ChatRequest> for IncomingMessage {
    /// Drops the routing headers.
    fn from(request: ChatRequest) -> Self {
        Self {
            request_id: request.request_id,
            content: request.content,
            fresh_start: request.fresh_start,
            resume_hint: request.resume_hint,
        }
    }
}

/// A complete reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    pub content: String,
    pub model: Option<String>,
    pub usage: Option<TokenUsage>,
}

impl Reply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = Some(TokenUsage {
            input_tokens,
            output_tokens,
        });
        self
    }
}

/// One piece of a streamed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyChunk {
    Text(String),
    /// Optional final record. A stream that ends without one is closed with
    /// no model or usage.
    End {
        model: Option<String>,
        usage: Option<TokenUsage>,
    },
}

pub type ReplyStream = BoxStream<'static, Result<ReplyChunk>>;

#[async_trait]
pub trait AgentHandler: Send + Sync + 'static {
    async fn handle(&self, message: IncomingMessage) -> Result<Reply>;

    /// Streams a reply. The default sends the whole [`handle`](Self::handle)
    /// reply as one chunk.
    async fn handle_stream(&self, message: IncomingMessage) -> Result<ReplyStream> {
        let reply = self.handle(message).await?;
        let chunks = vec![
            Ok(ReplyChunk::Text(reply.content)),
            Ok(ReplyChunk::End {
                model: reply.model,
                usage: reply.usage,
            }),
        ];
        Ok(futures::stream::iter(chunks).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_headers_do_not_reach_the_handler() {
        let mut headers = BTreeMap::new();
        headers.insert("x-chorus-broadcast-id".to_string(), "b-1".to_string());
        let request = ChatRequest {
            request_id: Uuid::new_v4(),
            content: "hello".to_string(),
            stream: false,
            fresh_start: true,
            resume_hint: Some("notes".to_string()),
            headers,
        };

        let message = IncomingMessage::from(request);
        assert_eq!(message.content, "hello");
        assert!(message.fresh_start);
        assert_eq!(message.resume_hint.as_deref(), Some("notes"));
    }

    struct Upper;

    #[async_trait]
    impl AgentHandler for Upper {
        async fn handle(&self, message: IncomingMessage) -> Result<Reply> {
            Ok(Reply::text(message.content.to_uppercase()).with_usage(2, 1))
        }
    }

    #[tokio::test]
    async fn test_default_stream_wraps_complete_reply() {
        let message = IncomingMessage {
            request_id: Uuid::new_v4(),
            content: "abc".to_string(),
            fresh_start: false,
            resume_hint: None,
        };
        let chunks: Vec<_> = Upper.handle_stream(message).await.unwrap().collect().await;

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].as_ref().unwrap(), &ReplyChunk::Text("ABC".to_string()));
        assert!(matches!(
            chunks[1].as_ref().unwrap(),
            ReplyChunk::End { usage: Some(usage), .. } if usage.total() == 3
        ));
    }
}
