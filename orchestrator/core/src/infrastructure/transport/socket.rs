// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Direct socket transport
//!
//! One TCP connection per call. The request is a single NDJSON record; the
//! reply is either one `chat_response` / `error` record or a run of stream
//! records. Connect and request timeouts are always applied.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::debug;

use crate::domain::config::TransportConfig;
use crate::domain::message::{AgentResponse, Message};
use crate::domain::registry::{RegistryEntry, TransportKind};
use crate::domain::transport::{FragmentStream, SendOptions, Transport, TransportError};
use super::wire::{parse_reply, ChatRequest, WireReply, WireRequest, MAX_FRAME_LENGTH};
use super::{decode_fragments, frame_error};

type Connection = Framed<TcpStream, LinesCodec>;

#[derive(Debug, Clone)]
pub struct SocketTransport {
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl SocketTransport {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            request_timeout: config.request_timeout,
        }
    }

    pub fn with_timeouts(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }

    async fn open(
        &self,
        entry: &RegistryEntry,
        request: ChatRequest,
    ) -> Result<Connection, TransportError> {
        let port = entry.port.ok_or_else(|| TransportError::Unreachable {
            agent: entry.name.clone(),
            reason: "registry entry has no port".to_string(),
        })?;

        let stream = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((entry.host.as_str(), port)),
        )
        .await
        .map_err(|_| TransportError::Timeout {
            agent: entry.name.clone(),
            after: self.connect_timeout,
        })?
        .map_err(|e| TransportError::Unreachable {
            agent: entry.name.clone(),
            reason: format!("{}:{}: {}", entry.host, port, e),
        })?;

        let mut connection = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_LENGTH));
        let record = serde_json::to_string(&WireRequest::Chat(request)).map_err(|e| {
            TransportError::Protocol {
                agent: entry.name.clone(),
                message: e.to_string(),
            }
        })?;
        connection
            .send(record)
            .await
            .map_err(|e| frame_error(&entry.name, e))?;
        debug!(agent = %entry.name, port, "Request written");
        Ok(connection)
    }

    async fn exchange(
        &self,
        entry: &RegistryEntry,
        message: &Message,
        options: &SendOptions,
    ) -> Result<AgentResponse, TransportError> {
        let started = Instant::now();
        let request = ChatRequest::from_message(message, options, false);
        let mut connection = self.open(entry, request).await?;

        // Agents that stream anyway are collected into one response.
        let mut streamed = String::new();
        loop {
            let line = match connection.next().await {
                Some(Ok(line)) => line,
                Some(Err(e)) => return Err(frame_error(&entry.name, e)),
                None => {
                    return Err(TransportError::Unreachable {
                        agent: entry.name.clone(),
                        reason: "connection closed before a reply was received".to_string(),
                    })
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse_reply(&entry.name, &line)? {
                WireReply::ChatResponse { content, model, usage } => {
                    return Ok(AgentResponse {
                        agent: entry.name.clone(),
                        content,
                        model,
                        usage,
                        elapsed: started.elapsed(),
                    })
                }
                WireReply::StreamStart { .. } => {}
                WireReply::StreamChunk { content } => streamed.push_str(&content),
                WireReply::StreamEnd { model, usage } => {
                    return Ok(AgentResponse {
                        agent: entry.name.clone(),
                        content: streamed,
                        model,
                        usage,
                        elapsed: started.elapsed(),
                    })
                }
                WireReply::StreamError { message } | WireReply::Error { message } => {
                    return Err(TransportError::Agent {
                        agent: entry.name.clone(),
                        message,
                    })
                }
            }
        }
    }
}

#[async_trait]
impl Transport for SocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::DirectSocket
    }

    async fn send(
        &self,
        entry: &RegistryEntry,
        message: &Message,
        options: &SendOptions,
    ) -> Result<AgentResponse, TransportError> {
        tokio::time::timeout(self.request_timeout, self.exchange(entry, message, options))
            .await
            .map_err(|_| TransportError::Timeout {
                agent: entry.name.clone(),
                after: self.request_timeout,
            })?
    }

    async fn stream(
        &self,
        entry: &RegistryEntry,
        message: &Message,
        options: &SendOptions,
    ) -> Result<FragmentStream, TransportError> {
        let request = ChatRequest::from_message(message, options, true);
        let connection = tokio::time::timeout(self.request_timeout, self.open(entry, request))
            .await
            .map_err(|_| TransportError::Timeout {
                agent: entry.name.clone(),
                after: self.request_timeout,
            })??;
        Ok(decode_fragments(entry.name.clone(), connection, self.request_timeout))
    }
}
