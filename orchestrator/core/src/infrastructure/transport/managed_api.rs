// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Managed API Transport
//
// Reaches agents that live behind a supervising service. Requests are POSTed
// to `{base}/api/agents/{name}/message`, where `base` is the entry's own
// `http://host:port` when it has a port and the configured supervisor
// endpoint otherwise. Streaming replies come back as an NDJSON body using the
// same stream records as the socket protocol.

use async_trait::async_trait;
use futures::StreamExt;
use std::time::{Duration, Instant};
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::domain::config::TransportConfig;
use crate::domain::message::{AgentResponse, Message};
use crate::domain::registry::{RegistryEntry, TransportKind};
use crate::domain::transport::{FragmentStream, SendOptions, Transport, TransportError};
use super::decode_fragments;
use super::wire::{ChatRequest, ManagedReply, MAX_FRAME_LENGTH};

pub struct ManagedApiTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    request_timeout: Duration,
}

impl ManagedApiTransport {
    pub fn new(config: &TransportConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: config.managed_api.endpoint.clone(),
            api_key: config.managed_api.resolved_api_key(),
            request_timeout: config.request_timeout,
        })
    }

    fn url(&self, entry: &RegistryEntry) -> String {
        let base = match entry.port {
            Some(port) => format!("http://{}:{}", entry.host, port),
            None => self.endpoint.trim_end_matches('/').to_string(),
        };
        format!("{}/api/agents/{}/message", base, entry.name)
    }

    async fn post(
        &self,
        entry: &RegistryEntry,
        request: &ChatRequest,
    ) -> Result<reqwest::Response, TransportError> {
        let url = self.url(entry);
        debug!(agent = %entry.name, url = %url, stream = request.stream, "Posting to managed API");

        let mut builder = self.client.post(&url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        if !request.stream {
            builder = builder.timeout(self.request_timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.request_error(&entry.name, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(TransportError::Agent {
                agent: entry.name.clone(),
                message: format!("HTTP {}: {}", status, error_text),
            });
        }
        Ok(response)
    }

    fn request_error(&self, agent: &str, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout {
                agent: agent.to_string(),
                after: self.request_timeout,
            }
        } else {
            TransportError::Unreachable {
                agent: agent.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl Transport for ManagedApiTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::ManagedApi
    }

    async fn send(
        &self,
        entry: &RegistryEntry,
        message: &Message,
        options: &SendOptions,
    ) -> Result<AgentResponse, TransportError> {
        let started = Instant::now();
        let request = ChatRequest::from_message(message, options, false);
        let response = self.post(entry, &request).await?;

        let reply: ManagedReply = response.json().await.map_err(|e| {
            if e.is_timeout() {
                self.request_error(&entry.name, e)
            } else {
                TransportError::Protocol {
                    agent: entry.name.clone(),
                    message: format!("Failed to parse response: {}", e),
                }
            }
        })?;

        Ok(AgentResponse {
            agent: entry.name.clone(),
            content: reply.content,
            model: reply.model,
            usage: reply.usage,
            elapsed: started.elapsed(),
        })
    }

    async fn stream(
        &self,
        entry: &RegistryEntry,
        message: &Message,
        options: &SendOptions,
    ) -> Result<FragmentStream, TransportError> {
        let request = ChatRequest::from_message(message, options, true);
        let response = tokio::time::timeout(self.request_timeout, self.post(entry, &request))
            .await
            .map_err(|_| TransportError::Timeout {
                agent: entry.name.clone(),
                after: self.request_timeout,
            })??;

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other))
            .boxed();
        let lines = FramedRead::new(
            StreamReader::new(body),
            LinesCodec::new_with_max_length(MAX_FRAME_LENGTH),
        );
        Ok(decode_fragments(entry.name.clone(), lines, self.request_timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::ManagedApiConfig;
    use crate::domain::message::ResponseFragment;

    fn transport(endpoint: &str, api_key: Option<&str>) -> ManagedApiTransport {
        ManagedApiTransport::new(&TransportConfig {
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(2),
            managed_api: ManagedApiConfig {
                endpoint: endpoint.to_string(),
                api_key: api_key.map(str::to_string),
            },
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_send_posts_to_supervisor_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/agents/beta/message")
            .match_header("authorization", "Bearer secret")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "content": "status?",
                "stream": false
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"response":"all green","usage":{"input_tokens":10,"output_tokens":3}}"#)
            .create_async()
            .await;

        let entry = RegistryEntry::managed("beta");
        let message = Message::to_agent("operator", "beta", "status?");
        let response = transport(&server.url(), Some("secret"))
            .send(&entry, &message, &SendOptions::default())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.content, "all green");
        assert_eq!(response.usage.unwrap().total(), 13);
    }

    #[tokio::test]
    async fn test_http_error_maps_to_agent_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/agents/beta/message")
            .with_status(503)
            .with_body("supervisor busy")
            .create_async()
            .await;

        let entry = RegistryEntry::managed("beta");
        let message = Message::to_agent("operator", "beta", "hi");
        let err = transport(&server.url(), None)
            .send(&entry, &message, &SendOptions::default())
            .await
            .unwrap_err();

        match err {
            TransportError::Agent { message, .. } => {
                assert!(message.contains("503"));
                assert!(message.contains("supervisor busy"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_reads_ndjson_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/agents/beta/message")
            .with_status(200)
            .with_header("content-type", "application/x-ndjson")
            .with_body(concat!(
                "{\"type\":\"stream_start\"}\n",
                "{\"type\":\"stream_chunk\",\"content\":\"hel\"}\n",
                "{\"type\":\"stream_chunk\",\"content\":\"lo\"}\n",
                "{\"type\":\"stream_end\"}\n"
            ))
            .create_async()
            .await;

        let entry = RegistryEntry::managed("beta");
        let message = Message::to_agent("operator", "beta", "hi");
        let fragments: Vec<_> = transport(&server.url(), None)
            .stream(&entry, &message, &SendOptions::default())
            .await
            .unwrap()
            .collect()
            .await;

        let text: String = fragments
            .iter()
            .filter_map(|f| match f {
                Ok(ResponseFragment::Chunk { content, .. }) => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "hello");
        assert!(fragments.last().unwrap().as_ref().unwrap().is_done());
    }

    #[test]
    fn test_entry_port_overrides_endpoint() {
        let transport = transport("http://supervisor:8003/", None);
        let mut entry = RegistryEntry::managed("beta");
        assert_eq!(
            transport.url(&entry),
            "http://supervisor:8003/api/agents/beta/message"
        );
        entry.host = "10.0.0.5".to_string();
        entry.port = Some(9100);
        assert_eq!(transport.url(&entry), "http://10.0.0.5:9100/api/agents/beta/message");
    }
}
