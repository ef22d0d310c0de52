// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Team chat through the real registry, discovery and messenger.

use async_trait::async_trait;
use chorus_core::application::{ChorusContext, Registration};
use chorus_core::domain::budget::{ModelProfile, Severity};
use chorus_core::domain::config::ChorusConfig;
use chorus_core::domain::lifecycle::{SummarySource, SundownReason};
use chorus_core::domain::message::{AgentResponse, Message, TokenUsage, HEADER_PURPOSE};
use chorus_core::domain::registry::{PortRange, RegistryEntry, TransportKind};
use chorus_core::domain::transport::{FragmentStream, SendOptions, Transport, TransportError};
use chorus_core::infrastructure::repositories::InMemorySundownRepository;
use chorus_core::infrastructure::transport::TransportSet;
use chorus_swarm::application::BroadcastOrchestrator;
use chorus_swarm::domain::{BroadcastEventKind, BroadcastOptions};
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Echoes the body back, tagged with the transport kind that carried it.
struct Echo(TransportKind);

#[async_trait]
impl Transport for Echo {
    fn kind(&self) -> TransportKind {
        self.0
    }

    async fn send(
        &self,
        entry: &RegistryEntry,
        message: &Message,
        _options: &SendOptions,
    ) -> Result<AgentResponse, TransportError> {
        Ok(AgentResponse {
            agent: entry.name.clone(),
            content: format!("{}: {}", self.0, message.body),
            model: None,
            usage: None,
            elapsed: Duration::from_millis(1),
        })
    }

    async fn stream(
        &self,
        _entry: &RegistryEntry,
        _message: &Message,
        _options: &SendOptions,
    ) -> Result<FragmentStream, TransportError> {
        Err(TransportError::Unsupported(self.0))
    }
}

fn context(dir: &std::path::Path) -> ChorusContext {
    let mut config = ChorusConfig::default();
    config.spec.registry.path = dir.to_path_buf();
    config.spec.registry.port_range = PortRange::new(9001, 9010);
    config.spec.registry.probe_bind = false;

    let transports = TransportSet::new()
        .with(Arc::new(Echo(TransportKind::DirectSocket)))
        .with(Arc::new(Echo(TransportKind::ManagedApi)));
    tokio_test::assert_ok!(ChorusContext::with_parts(
        config,
        transports,
        Arc::new(InMemorySundownRepository::new()),
    ))
}

#[tokio::test]
async fn test_broadcast_excluding_managed_agent_reaches_only_socket_agent() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    ctx.registry
        .register(RegistryEntry::socket("alpha", "127.0.0.1", 9001), Registration::default())
        .await
        .unwrap();
    ctx.registry
        .register(RegistryEntry::managed("beta"), Registration::default())
        .await
        .unwrap();

    let orchestrator = BroadcastOrchestrator::new(
        Arc::new(ctx.messenger.clone()),
        BroadcastOptions::from(&ctx.config.spec.broadcast),
    );
    let stream = orchestrator
        .broadcast(
            &Message::broadcast("operator", "ping"),
            orchestrator.defaults().clone().excluding(["beta"]),
        )
        .await
        .unwrap();
    let events: Vec<_> = StreamExt::collect::<Vec<_>>(stream).await;

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].target, "alpha");
    match &events[0].kind {
        BroadcastEventKind::Delivered { response } => {
            assert_eq!(response.content, format!("{}: ping", TransportKind::DirectSocket))
        }
        other => panic!("expected delivery, got {:?}", other),
    }
}

#[tokio::test]
async fn test_team_chat_reaches_every_transport_kind() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    ctx.registry
        .register(RegistryEntry::socket("alpha", "127.0.0.1", 9001), Registration::default())
        .await
        .unwrap();
    ctx.registry
        .register(RegistryEntry::managed("beta"), Registration::default())
        .await
        .unwrap();

    let orchestrator = BroadcastOrchestrator::new(Arc::new(ctx.messenger.clone()), BroadcastOptions::default());
    let report = orchestrator
        .team_chat(&Message::broadcast("operator", "stand-up"))
        .await
        .unwrap();

    assert!(report.all_delivered());
    let mut agents: Vec<_> = report.responses.iter().map(|r| r.agent.as_str()).collect();
    agents.sort_unstable();
    assert_eq!(agents, vec!["alpha", "beta"]);

    // Each copy went through the messenger, so each agent now has a budget.
    assert!(ctx.budgets.snapshot("alpha").is_some());
    assert!(ctx.budgets.snapshot("beta").is_some());
}

/// Replies to chat with a fixed usage figure after `chat_delay_ms`, and to
/// summary requests after `summary_delay_ms`.
struct Summarizer {
    usage_per_reply: u64,
    chat_delay_ms: AtomicU64,
    summary_delay_ms: AtomicU64,
    summaries: AtomicUsize,
}

impl Summarizer {
    fn new(usage_per_reply: u64, summary_delay_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            usage_per_reply,
            chat_delay_ms: AtomicU64::new(0),
            summary_delay_ms: AtomicU64::new(summary_delay_ms),
            summaries: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Transport for Summarizer {
    fn kind(&self) -> TransportKind {
        TransportKind::DirectSocket
    }

    async fn send(
        &self,
        entry: &RegistryEntry,
        message: &Message,
        _options: &SendOptions,
    ) -> Result<AgentResponse, TransportError> {
        let is_summary = message.header(HEADER_PURPOSE) == Some("sundown");
        let delay = if is_summary {
            &self.summary_delay_ms
        } else {
            &self.chat_delay_ms
        };
        tokio::time::sleep(Duration::from_millis(delay.load(Ordering::SeqCst))).await;
        if is_summary {
            self.summaries.fetch_add(1, Ordering::SeqCst);
        }

        Ok(AgentResponse {
            agent: entry.name.clone(),
            content: if is_summary {
                "Working on the release notes.\nDecision: ship on Friday".to_string()
            } else {
                format!("ack: {}", message.body)
            },
            model: Some("small".to_string()),
            usage: (!is_summary).then(|| TokenUsage {
                input_tokens: self.usage_per_reply,
                output_tokens: 0,
            }),
            elapsed: Duration::from_millis(1),
        })
    }

    async fn stream(
        &self,
        _entry: &RegistryEntry,
        _message: &Message,
        _options: &SendOptions,
    ) -> Result<FragmentStream, TransportError> {
        Err(TransportError::Unsupported(TransportKind::DirectSocket))
    }
}

async fn budgeted_context(dir: &std::path::Path, agent: Arc<Summarizer>) -> ChorusContext {
    let mut config = ChorusConfig::default();
    config.spec.registry.path = dir.to_path_buf();
    config.spec.registry.port_range = PortRange::new(9011, 9020);
    config.spec.registry.probe_bind = false;
    config.spec.budget.default_model = "small".to_string();
    config.spec.budget.models = vec![ModelProfile::new("small", 10_000)];

    let ctx = ChorusContext::with_parts(
        config,
        TransportSet::new().with(agent),
        Arc::new(InMemorySundownRepository::new()),
    )
    .unwrap();
    ctx.registry
        .register(
            RegistryEntry::socket("delta", "127.0.0.1", 9011).with_metadata("model", "small"),
            Registration::default(),
        )
        .await
        .unwrap();
    ctx
}

#[tokio::test]
async fn test_preserve_crossing_during_broadcast_outlives_per_target_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let agent = Summarizer::new(8_600, 500);
    let ctx = budgeted_context(dir.path(), agent.clone()).await;

    let orchestrator = BroadcastOrchestrator::new(
        Arc::new(ctx.messenger.clone()),
        BroadcastOptions::default().with_per_target_timeout(Duration::from_millis(200)),
    );
    let report = orchestrator
        .team_chat(&Message::broadcast("operator", "status?"))
        .await
        .unwrap();

    assert_eq!(report.responses.len(), 1);
    assert!(report.timeouts.is_empty());
    assert_eq!(report.responses[0].content, "ack: status?");

    assert_eq!(agent.summaries.load(Ordering::SeqCst), 1);
    let preserved = ctx.lifecycle.peek("delta").await.unwrap().unwrap();
    assert_eq!(preserved.source, SummarySource::Agent);
    assert_eq!(preserved.reason, SundownReason::Threshold(Severity::AutoPreserve));
    assert!(preserved.resume_hint.contains("Decision: ship on Friday"));
    assert!(ctx.lifecycle.needs_fresh_start("delta").await.unwrap());
}

#[tokio::test]
async fn test_dropping_broadcast_stream_keeps_automatic_sundown() {
    let dir = tempfile::tempdir().unwrap();
    let agent = Summarizer::new(8_600, 300);
    let ctx = budgeted_context(dir.path(), agent.clone()).await;

    let orchestrator = BroadcastOrchestrator::new(Arc::new(ctx.messenger.clone()), BroadcastOptions::default());
    let mut stream = orchestrator
        .broadcast(&Message::broadcast("operator", "status?"), BroadcastOptions::default())
        .await
        .unwrap();
    let first = stream.next().await.unwrap();
    assert!(matches!(first.kind, BroadcastEventKind::Delivered { .. }));
    drop(stream);

    orchestrator.settle().await;
    assert_eq!(agent.summaries.load(Ordering::SeqCst), 1);
    assert!(ctx.lifecycle.peek("delta").await.unwrap().is_some());
    assert!(ctx.lifecycle.needs_fresh_start("delta").await.unwrap());
}

#[tokio::test]
async fn test_timed_out_target_keeps_its_pending_sunrise() {
    let dir = tempfile::tempdir().unwrap();
    let agent = Summarizer::new(100, 0);
    let ctx = budgeted_context(dir.path(), agent.clone()).await;
    ctx.lifecycle
        .sundown("delta", SundownReason::Manual("handover".to_string()))
        .await
        .unwrap();

    agent.chat_delay_ms.store(500, Ordering::SeqCst);
    let orchestrator = BroadcastOrchestrator::new(
        Arc::new(ctx.messenger.clone()),
        BroadcastOptions::default().with_per_target_timeout(Duration::from_millis(100)),
    );
    let report = orchestrator
        .team_chat(&Message::broadcast("operator", "status?"))
        .await
        .unwrap();

    assert_eq!(report.timeouts.len(), 1);
    let requeued = ctx.lifecycle.peek("delta").await.unwrap().unwrap();
    assert_eq!(requeued.reason, SundownReason::Manual("handover".to_string()));
    assert!(ctx.lifecycle.needs_fresh_start("delta").await.unwrap());
}
