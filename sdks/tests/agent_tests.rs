// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! A self-registered agent reached through the real socket transport.

use async_trait::async_trait;
use chorus_core::application::{ChorusContext, RegistryClient};
use chorus_core::domain::config::{ChorusConfig, RegistryConfig};
use chorus_core::domain::lifecycle::{SummarySource, SundownReason};
use chorus_core::domain::message::{Message, ResponseFragment};
use chorus_core::domain::registry::PortRange;
use chorus_core::domain::transport::{SendOptions, Transport};
use chorus_core::infrastructure::repositories::InMemorySundownRepository;
use chorus_core::infrastructure::transport::{SocketTransport, TransportSet};
use chorus_core::infrastructure::EventBus;
use chorus_sdk::{AgentHandler, IncomingMessage, Reply, SelfRegistration};
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Describes what it was given.
struct Reporter;

#[async_trait]
impl AgentHandler for Reporter {
    async fn handle(&self, message: IncomingMessage) -> anyhow::Result<Reply> {
        Ok(Reply::text(format!(
            "fresh={} hint={} body={}",
            message.fresh_start,
            message.resume_hint.as_deref().unwrap_or("-"),
            message.content
        ))
        .with_model("small")
        .with_usage(10, 5))
    }
}

fn registry_config(dir: &Path, range: PortRange) -> RegistryConfig {
    RegistryConfig {
        path: dir.to_path_buf(),
        port_range: range,
        ..RegistryConfig::default()
    }
}

fn transport() -> SocketTransport {
    SocketTransport::with_timeouts(Duration::from_secs(1), Duration::from_secs(2))
}

#[tokio::test]
async fn test_registered_agent_answers_over_socket() {
    let dir = tempfile::tempdir().unwrap();
    let registry = RegistryClient::open(&registry_config(dir.path(), PortRange::new(47100, 47119)), EventBus::default()).unwrap();

    let agent = SelfRegistration::new(registry.clone(), "alpha")
        .with_owner("sdk-tests")
        .with_model("small")
        .start(Arc::new(Reporter))
        .await
        .unwrap();

    let entry = registry.get("alpha").await.unwrap().unwrap();
    assert_eq!(entry.port, agent.port());
    assert_eq!(entry.model(), Some("small"));
    assert_eq!(entry.process_id, Some(std::process::id()));

    let message = Message::to_agent("operator", "alpha", "hello").addressed_to("alpha");
    let options = SendOptions {
        fresh_start: true,
        resume_hint: Some("notes".to_string()),
    };
    let response = transport().send(&entry, &message, &options).await.unwrap();
    assert_eq!(response.content, "fresh=true hint=notes body=hello");
    assert_eq!(response.usage.map(|u| u.total()), Some(15));

    let fragments: Vec<_> = transport()
        .stream(&entry, &message, &SendOptions::default())
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(fragments.len(), 2);
    assert_eq!(
        fragments[0].as_ref().unwrap(),
        &ResponseFragment::Chunk {
            index: 0,
            content: "fresh=false hint=- body=hello".to_string()
        }
    );
    assert!(fragments[1].as_ref().unwrap().is_done());

    agent.shutdown().await.unwrap();
    assert!(registry.get("alpha").await.unwrap().is_none());
    assert!(transport().send(&entry, &message, &options).await.is_err());
}

#[tokio::test]
async fn test_heartbeat_refreshes_last_seen() {
    let dir = tempfile::tempdir().unwrap();
    let registry = RegistryClient::open(&registry_config(dir.path(), PortRange::new(47120, 47139)), EventBus::default()).unwrap();

    let agent = SelfRegistration::new(registry.clone(), "beta")
        .with_heartbeat(Duration::from_millis(50))
        .start(Arc::new(Reporter))
        .await
        .unwrap();
    let registered = registry.get("beta").await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let refreshed = registry.get("beta").await.unwrap().unwrap();
    assert!(refreshed.last_seen > registered.last_seen);
    assert_eq!(refreshed.registered_at, registered.registered_at);

    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_name_releases_the_lease() {
    let dir = tempfile::tempdir().unwrap();
    let range = PortRange::new(47140, 47141);
    let registry = RegistryClient::open(&registry_config(dir.path(), range), EventBus::default()).unwrap();

    let first = SelfRegistration::new(registry.clone(), "gamma")
        .start(Arc::new(Reporter))
        .await
        .unwrap();
    let second = SelfRegistration::new(registry.clone(), "gamma")
        .start(Arc::new(Reporter))
        .await;
    assert!(second.is_err());

    // The failed attempt's port is free again for someone else.
    let third = SelfRegistration::new(registry.clone(), "delta")
        .start(Arc::new(Reporter))
        .await
        .unwrap();

    third.shutdown().await.unwrap();
    first.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_messenger_and_sundown_against_live_agent() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ChorusConfig::default();
    config.spec.registry = registry_config(&dir.path().join("registry"), PortRange::new(47150, 47169));

    let ctx = ChorusContext::with_parts(
        config,
        TransportSet::new().with(Arc::new(transport())),
        Arc::new(InMemorySundownRepository::new()),
    )
    .unwrap();
    let agent = SelfRegistration::new(ctx.registry.clone(), "epsilon")
        .start(Arc::new(Reporter))
        .await
        .unwrap();

    let response = ctx
        .messenger
        .send("epsilon", &Message::to_agent("operator", "epsilon", "status"))
        .await
        .unwrap();
    assert_eq!(response.content, "fresh=false hint=- body=status");
    assert_eq!(ctx.budgets.snapshot("epsilon").unwrap().current_usage, 15);

    let outcome = ctx
        .lifecycle
        .sundown("epsilon", SundownReason::Manual("end of day".to_string()))
        .await
        .unwrap();
    assert_eq!(outcome.state.source, SummarySource::Agent);

    let response = ctx
        .messenger
        .send("epsilon", &Message::to_agent("operator", "epsilon", "morning"))
        .await
        .unwrap();
    assert!(response.content.starts_with("fresh=true hint="));
    assert!(response.content.ends_with("body=morning"));

    agent.shutdown().await.unwrap();
}
