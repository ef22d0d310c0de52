// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent-side NDJSON server.
//!
//! Accepts `chat` records, one per line, and answers each with either a
//! `chat_response` / `error` record or, when the request asks for
//! streaming, `stream_start`, `stream_chunk`..., `stream_end` (or
//! `stream_error`). A connection may carry any number of requests.

use chorus_core::infrastructure::transport::wire::{ChatRequest, WireReply, WireRequest, MAX_FRAME_LENGTH};
use futures::{SinkExt, StreamExt};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::handler::{AgentHandler, ReplyChunk};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Open connections get this long to finish after shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

type Lines = Framed<TcpStream, LinesCodec>;

pub struct AgentServer {
    name: String,
    handler: Arc<dyn AgentHandler>,
    request_timeout: Duration,
    shutdown: CancellationToken,
}

impl AgentServer {
    pub fn new(name: impl Into<String>, handler: Arc<dyn AgentHandler>) -> Self {
        Self {
            name: name.into(),
            handler,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            shutdown: CancellationToken::new(),
        }
    }

    /// Bound on each handler call, and on each wait for the next chunk of a
    /// streamed reply.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Cancelling this token stops the server: no new connections or
    /// requests are accepted and requests already running get to finish.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        let local = listener.local_addr()?;
        info!(agent = %self.name, address = %local, "Agent server listening");

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        debug!(agent = %self.name, peer = %peer, "Connection accepted");
                        let connection = Connection {
                            agent: self.name.clone(),
                            handler: self.handler.clone(),
                            request_timeout: self.request_timeout,
                            shutdown: self.shutdown.clone(),
                        };
                        connections.spawn(connection.run(socket));
                    }
                    Err(e) => {
                        warn!(agent = %self.name, error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }
        drop(listener);

        info!(agent = %self.name, open = connections.len(), "Agent server shutting down");
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(agent = %self.name, open = connections.len(), "Aborting connections still open after shutdown grace");
            connections.abort_all();
        }
        Ok(())
    }
}

struct Connection {
    agent: String,
    handler: Arc<dyn AgentHandler>,
    request_timeout: Duration,
    shutdown: CancellationToken,
}

impl Connection {
    async fn run(self, socket: TcpStream) {
        let mut lines = Framed::new(socket, LinesCodec::new_with_max_length(MAX_FRAME_LENGTH));
        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = lines.next() => next,
            };
            let line = match next {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    warn!(agent = %self.agent, error = %e, "Dropping connection after framing error");
                    break;
                }
                None => break,
            };
            if line.trim().is_empty() {
                continue;
            }

            let written = match serde_json::from_str::<WireRequest>(&line) {
                Ok(WireRequest::Chat(request)) if request.stream => self.stream_reply(&mut lines, request).await,
                Ok(WireRequest::Chat(request)) => self.reply(&mut lines, request).await,
                Err(e) => {
                    let record = WireReply::Error {
                        message: format!("malformed request: {}", e),
                    };
                    send(&mut lines, &record).await
                }
            };
            if let Err(e) = written {
                debug!(agent = %self.agent, error = %e, "Peer went away while replying");
                break;
            }
        }
    }

    async fn reply(&self, lines: &mut Lines, request: ChatRequest) -> Result<(), LinesCodecError> {
        debug!(agent = %self.agent, request_id = %request.request_id, headers = request.headers.len(), "Request received");
        let record = match tokio::time::timeout(self.request_timeout, self.handler.handle(request.into())).await {
            Ok(Ok(reply)) => WireReply::ChatResponse {
                content: reply.content,
                model: reply.model,
                usage: reply.usage,
            },
            Ok(Err(e)) => {
                warn!(agent = %self.agent, error = %e, "Handler failed");
                WireReply::Error {
                    message: format!("{:#}", e),
                }
            }
            Err(_) => WireReply::Error {
                message: format!("handler timed out after {:?}", self.request_timeout),
            },
        };
        send(lines, &record).await
    }

    async fn stream_reply(&self, lines: &mut Lines, request: ChatRequest) -> Result<(), LinesCodecError> {
        debug!(agent = %self.agent, request_id = %request.request_id, "Streaming request received");
        let mut chunks = match tokio::time::timeout(self.request_timeout, self.handler.handle_stream(request.into())).await {
            Ok(Ok(chunks)) => chunks,
            Ok(Err(e)) => {
                warn!(agent = %self.agent, error = %e, "Handler failed");
                let record = WireReply::StreamError {
                    message: format!("{:#}", e),
                };
                return send(lines, &record).await;
            }
            Err(_) => return send(lines, &self.timed_out()).await,
        };

        send(lines, &WireReply::StreamStart { model: None }).await?;
        loop {
            let record = match tokio::time::timeout(self.request_timeout, chunks.next()).await {
                Ok(Some(Ok(ReplyChunk::Text(content)))) => {
                    send(lines, &WireReply::StreamChunk { content }).await?;
                    continue;
                }
                Ok(Some(Ok(ReplyChunk::End { model, usage }))) => WireReply::StreamEnd { model, usage },
                Ok(None) => WireReply::StreamEnd {
                    model: None,
                    usage: None,
                },
                Ok(Some(Err(e))) => {
                    warn!(agent = %self.agent, error = %e, "Handler stream failed");
                    WireReply::StreamError {
                        message: format!("{:#}", e),
                    }
                }
                Err(_) => self.timed_out(),
            };
            return send(lines, &record).await;
        }
    }

    fn timed_out(&self) -> WireReply {
        WireReply::StreamError {
            message: format!("handler timed out after {:?}", self.request_timeout),
        }
    }
}

async fn send(lines: &mut Lines, record: &WireReply) -> Result<(), LinesCodecError> {
    let line = serde_json::to_string(record).map_err(|e| LinesCodecError::Io(io::Error::other(e)))?;
    lines.send(line).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{IncomingMessage, Reply};
    use async_trait::async_trait;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    struct Echo;

    #[async_trait]
    impl AgentHandler for Echo {
        async fn handle(&self, message: IncomingMessage) -> anyhow::Result<Reply> {
            match message.content.as_str() {
                "fail" => anyhow::bail!("cannot do that"),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(Reply::text("late"))
                }
                other => Ok(Reply::text(format!("echo: {}", other))),
            }
        }
    }

    async fn start() -> (std::net::SocketAddr, CancellationToken, tokio::task::JoinHandle<anyhow::Result<()>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let server = AgentServer::new("echo", Arc::new(Echo)).with_request_timeout(Duration::from_millis(200));
        let token = server.shutdown_token();
        let handle = tokio::spawn(server.serve(listener));
        (address, token, handle)
    }

    async fn exchange(address: std::net::SocketAddr, requests: &[&str]) -> Vec<serde_json::Value> {
        let socket = TcpStream::connect(address).await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut reader = BufReader::new(read).lines();
        let mut replies = Vec::new();
        for request in requests {
            write.write_all(request.as_bytes()).await.unwrap();
            write.write_all(b"\n").await.unwrap();
            let line = reader.next_line().await.unwrap().unwrap();
            replies.push(serde_json::from_str(&line).unwrap());
        }
        replies
    }

    #[tokio::test]
    async fn test_requests_on_one_connection() {
        let (address, token, handle) = start().await;

        let replies = exchange(
            address,
            &[
                r#"{"type":"chat","content":"one"}"#,
                r#"{"type":"chat","content":"fail"}"#,
                r#"{"type":"chat","content":"slow"}"#,
                "not json",
            ],
        )
        .await;

        assert_eq!(replies[0]["type"], "chat_response");
        assert_eq!(replies[0]["content"], "echo: one");
        assert_eq!(replies[1]["type"], "error");
        assert_eq!(replies[1]["message"], "cannot do that");
        assert_eq!(replies[2]["type"], "error");
        assert!(replies[2]["message"].as_str().unwrap().contains("timed out"));
        assert!(replies[3]["message"].as_str().unwrap().starts_with("malformed request"));

        token.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let (address, token, handle) = start().await;
        token.cancel();
        handle.await.unwrap().unwrap();

        assert!(TcpStream::connect(address).await.is_err());
    }
}
