// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Transport adapters
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** [`SocketTransport`] (direct NDJSON over TCP) and
//!   [`ManagedApiTransport`] (HTTP to a supervising service), collected in a
//!   [`TransportSet`] keyed by [`TransportKind`].

pub mod managed_api;
pub mod socket;
pub mod wire;

use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::codec::LinesCodecError;

use crate::domain::config::TransportConfig;
use crate::domain::message::ResponseFragment;
use crate::domain::registry::TransportKind;
use crate::domain::transport::{FragmentStream, Transport, TransportError};
use wire::{parse_reply, WireReply};

pub use managed_api::ManagedApiTransport;
pub use socket::SocketTransport;

/// Adapters available to discovery, one per transport kind.
#[derive(Clone, Default)]
pub struct TransportSet {
    transports: HashMap<TransportKind, Arc<dyn Transport>>,
}

impl TransportSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Socket and managed-API adapters built from configuration.
    pub fn from_config(config: &TransportConfig) -> anyhow::Result<Self> {
        Ok(Self::new()
            .with(Arc::new(SocketTransport::new(config)))
            .with(Arc::new(ManagedApiTransport::new(config)?)))
    }

    /// Registers (or replaces) the adapter for `transport.kind()`.
    pub fn with(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.insert(transport.kind(), transport);
        self
    }

    pub fn get(&self, kind: TransportKind) -> Result<Arc<dyn Transport>, TransportError> {
        self.transports
            .get(&kind)
            .cloned()
            .ok_or(TransportError::Unsupported(kind))
    }
}

fn frame_error(agent: &str, err: LinesCodecError) -> TransportError {
    match err {
        LinesCodecError::MaxLineLengthExceeded => TransportError::Protocol {
            agent: agent.to_string(),
            message: "reply record exceeds the maximum frame length".to_string(),
        },
        LinesCodecError::Io(e) => TransportError::Unreachable {
            agent: agent.to_string(),
            reason: e.to_string(),
        },
    }
}

/// Turns a line stream of reply records into ordered fragments. Every wait
/// for the next line is bounded by `idle_timeout`. A plain `chat_response`
/// is yielded as a single chunk followed by `Done`.
pub(crate) fn decode_fragments<S>(agent: String, mut lines: S, idle_timeout: Duration) -> FragmentStream
where
    S: Stream<Item = Result<String, LinesCodecError>> + Unpin + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut index: u32 = 0;
        loop {
            let next = match tokio::time::timeout(idle_timeout, lines.next()).await {
                Ok(next) => next,
                Err(_) => {
                    yield Err(TransportError::Timeout { agent: agent.clone(), after: idle_timeout });
                    break;
                }
            };
            let line = match next {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    yield Err(frame_error(&agent, e));
                    break;
                }
                None => {
                    yield Err(TransportError::Unreachable {
                        agent: agent.clone(),
                        reason: "connection closed before the stream ended".to_string(),
                    });
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse_reply(&agent, &line) {
                Ok(WireReply::StreamStart { .. }) => continue,
                Ok(WireReply::StreamChunk { content }) => {
                    yield Ok(ResponseFragment::Chunk { index, content });
                    index += 1;
                }
                Ok(WireReply::StreamEnd { model, usage }) => {
                    yield Ok(ResponseFragment::Done { model, usage });
                    break;
                }
                Ok(WireReply::ChatResponse { content, model, usage }) => {
                    yield Ok(ResponseFragment::Chunk { index, content });
                    yield Ok(ResponseFragment::Done { model, usage });
                    break;
                }
                Ok(WireReply::StreamError { message }) | Ok(WireReply::Error { message }) => {
                    yield Err(TransportError::Agent { agent: agent.clone(), message });
                    break;
                }
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
    };
    stream.boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn lines(records: &[&str]) -> impl Stream<Item = Result<String, LinesCodecError>> + Unpin + Send + 'static {
        let owned: Vec<Result<String, LinesCodecError>> =
            records.iter().map(|r| Ok(r.to_string())).collect();
        stream::iter(owned)
    }

    #[tokio::test]
    async fn test_stream_records_become_ordered_fragments() {
        let fragments: Vec<_> = decode_fragments(
            "alpha".to_string(),
            lines(&[
                r#"{"type":"stream_start","model":"m"}"#,
                r#"{"type":"stream_chunk","content":"a"}"#,
                r#"{"type":"stream_chunk","content":"b"}"#,
                r#"{"type":"stream_end","usage":{"input_tokens":3,"output_tokens":2}}"#,
            ]),
            Duration::from_secs(1),
        )
        .collect()
        .await;

        assert_eq!(fragments.len(), 3);
        assert_eq!(
            fragments[0].as_ref().unwrap(),
            &ResponseFragment::Chunk { index: 0, content: "a".into() }
        );
        assert_eq!(
            fragments[1].as_ref().unwrap(),
            &ResponseFragment::Chunk { index: 1, content: "b".into() }
        );
        assert!(fragments[2].as_ref().unwrap().is_done());
    }

    #[tokio::test]
    async fn test_truncated_stream_ends_with_error() {
        let fragments: Vec<_> = decode_fragments(
            "alpha".to_string(),
            lines(&[r#"{"type":"stream_chunk","content":"a"}"#]),
            Duration::from_secs(1),
        )
        .collect()
        .await;

        assert_eq!(fragments.len(), 2);
        assert!(matches!(fragments[1], Err(TransportError::Unreachable { .. })));
    }

    #[tokio::test]
    async fn test_missing_transport_kind_is_unsupported() {
        let set = TransportSet::new();
        assert!(matches!(
            set.get(TransportKind::ManagedApi),
            Err(TransportError::Unsupported(TransportKind::ManagedApi))
        ));
    }
}
