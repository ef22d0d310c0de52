// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Self-registration for socket agents.
//!
//! [`SelfRegistration::start`] allocates a port lease, binds it, registers
//! the entry with that lease, starts the [`AgentServer`] and, when a
//! heartbeat interval is set, keeps `last_seen` fresh. [`RunningAgent::shutdown`]
//! undoes all of it.

use anyhow::Context;
use chorus_core::application::{Registration, RegistryClient};
use chorus_core::domain::registry::{PortLease, RegistryEntry};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::handler::AgentHandler;
use crate::server::AgentServer;

const DEFAULT_HOST: &str = "127.0.0.1";

pub struct SelfRegistration {
    registry: RegistryClient,
    name: String,
    host: String,
    owner: Option<String>,
    metadata: BTreeMap<String, String>,
    heartbeat: Option<Duration>,
    request_timeout: Option<Duration>,
}

impl SelfRegistration {
    pub fn new(registry: RegistryClient, name: impl Into<String>) -> Self {
        Self {
            registry,
            name: name.into(),
            host: DEFAULT_HOST.to_string(),
            owner: None,
            metadata: BTreeMap::new(),
            heartbeat: None,
            request_timeout: None,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Advertises the model whose window the budget tracker should use.
    pub fn with_model(self, model: impl Into<String>) -> Self {
        self.with_metadata("model", model)
    }

    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = Some(interval);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub async fn start(self, handler: Arc<dyn AgentHandler>) -> anyhow::Result<RunningAgent> {
        let lease = self
            .registry
            .allocate_port()
            .await
            .with_context(|| format!("Failed to allocate a port for '{}'", self.name))?;

        let listener = match TcpListener::bind((self.host.as_str(), lease.port)).await {
            Ok(listener) => listener,
            Err(e) => {
                self.release(&lease).await;
                return Err(e).with_context(|| format!("Failed to bind {}:{}", self.host, lease.port));
            }
        };

        let mut entry = RegistryEntry::socket(&self.name, &self.host, lease.port)
            .with_process_id(std::process::id());
        if let Some(owner) = &self.owner {
            entry = entry.with_owner(owner);
        }
        for (key, value) in &self.metadata {
            entry = entry.with_metadata(key, value);
        }

        let entry = match self
            .registry
            .register(entry, Registration::with_lease(lease.clone()))
            .await
        {
            Ok(entry) => entry,
            Err(e) => {
                self.release(&lease).await;
                return Err(e).with_context(|| format!("Failed to register '{}'", self.name));
            }
        };
        info!(agent = %entry.name, port = lease.port, "Agent registered");

        let mut server = AgentServer::new(&self.name, handler);
        if let Some(timeout) = self.request_timeout {
            server = server.with_request_timeout(timeout);
        }
        let shutdown = server.shutdown_token();
        let server = tokio::spawn(server.serve(listener));

        let heartbeat = self
            .heartbeat
            .map(|interval| tokio::spawn(heartbeat(self.registry.clone(), self.name.clone(), interval, shutdown.clone())));

        Ok(RunningAgent {
            registry: self.registry,
            entry,
            shutdown,
            server,
            heartbeat,
        })
    }

    async fn release(&self, lease: &PortLease) {
        if let Err(e) = self.registry.release_port(lease).await {
            warn!(agent = %self.name, port = lease.port, error = %e, "Failed to release port lease");
        }
    }
}

async fn heartbeat(registry: RegistryClient, name: String, every: Duration, shutdown: CancellationToken) {
    let mut ticks = tokio::time::interval(every);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticks.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticks.tick() => match registry.touch(&name).await {
                Ok(true) => debug!(agent = %name, "Heartbeat"),
                Ok(false) => warn!(agent = %name, "Heartbeat found no registry entry"),
                Err(e) => warn!(agent = %name, error = %e, "Heartbeat failed"),
            },
        }
    }
}

/// A registered agent with its server running.
pub struct RunningAgent {
    registry: RegistryClient,
    entry: RegistryEntry,
    shutdown: CancellationToken,
    server: JoinHandle<anyhow::Result<()>>,
    heartbeat: Option<JoinHandle<()>>,
}

impl RunningAgent {
    pub fn entry(&self) -> &RegistryEntry {
        &self.entry
    }

    pub fn port(&self) -> Option<u16> {
        self.entry.port
    }

    /// Deregisters, stops the heartbeat and lets in-flight requests finish.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let removed = self
            .registry
            .deregister(&self.entry.name)
            .await
            .with_context(|| format!("Failed to deregister '{}'", self.entry.name))?;
        if !removed {
            warn!(agent = %self.entry.name, "Entry was already gone at shutdown");
        }

        self.shutdown.cancel();
        if let Some(heartbeat) = self.heartbeat {
            let _ = heartbeat.await;
        }
        self.server.await.context("Agent server task panicked")??;
        info!(agent = %self.entry.name, "Agent stopped");
        Ok(())
    }

    /// Runs until Ctrl-C, then shuts down.
    pub async fn run_until_ctrl_c(self) -> anyhow::Result<()> {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        self.shutdown().await
    }
}
