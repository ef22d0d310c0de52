// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Discovery Service
//!
//! Maps agent names to a registry entry plus the transport adapter selected
//! by the entry's `transport_kind`.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::application::registry::RegistryClient;
use crate::domain::error::ChorusError;
use crate::domain::registry::RegistryEntry;
use crate::domain::transport::Transport;
use crate::infrastructure::transport::TransportSet;

#[derive(Clone)]
pub struct ResolvedAgent {
    pub entry: RegistryEntry,
    pub transport: Arc<dyn Transport>,
}

impl ResolvedAgent {
    pub fn name(&self) -> &str {
        &self.entry.name
    }
}

impl std::fmt::Debug for ResolvedAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedAgent")
            .field("entry", &self.entry)
            .field("transport", &self.transport.kind())
            .finish()
    }
}

#[derive(Clone)]
pub struct DiscoveryService {
    registry: RegistryClient,
    transports: TransportSet,
}

impl DiscoveryService {
    pub fn new(registry: RegistryClient, transports: TransportSet) -> Self {
        Self {
            registry,
            transports,
        }
    }

    pub fn registry(&self) -> &RegistryClient {
        &self.registry
    }

    /// Resolves a single agent. Stale entries still resolve: the transport
    /// call decides whether the agent answers.
    pub async fn resolve(&self, name: &str) -> Result<ResolvedAgent, ChorusError> {
        let entry = self
            .registry
            .get(name)
            .await?
            .ok_or_else(|| ChorusError::AgentNotFound(name.to_string()))?;
        self.bind(entry)
    }

    /// All live entries not in `exclude`, sorted by name.
    pub async fn resolve_all(&self, exclude: &HashSet<String>) -> Result<Vec<ResolvedAgent>, ChorusError> {
        let entries = self.registry.list_live().await?;
        let resolved = entries
            .into_iter()
            .filter(|entry| !exclude.contains(&entry.name))
            .map(|entry| self.bind(entry))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(targets = resolved.len(), excluded = exclude.len(), "Resolved broadcast targets");
        Ok(resolved)
    }

    fn bind(&self, entry: RegistryEntry) -> Result<ResolvedAgent, ChorusError> {
        let transport = self.transports.get(entry.transport_kind)?;
        Ok(ResolvedAgent { entry, transport })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::registry::Registration;
    use crate::domain::config::RegistryConfig;
    use crate::domain::config::TransportConfig;
    use crate::domain::registry::{PortRange, TransportKind};
    use crate::infrastructure::event_bus::EventBus;

    async fn discovery(dir: &std::path::Path) -> DiscoveryService {
        let config = RegistryConfig {
            path: dir.to_path_buf(),
            port_range: PortRange::new(9200, 9210),
            probe_bind: false,
            ..RegistryConfig::default()
        };
        let registry = RegistryClient::open(&config, EventBus::default()).unwrap();
        for entry in [
            RegistryEntry::socket("gamma", "127.0.0.1", 9202),
            RegistryEntry::socket("alpha", "127.0.0.1", 9200),
            RegistryEntry::managed("beta"),
        ] {
            registry.register(entry, Registration::default()).await.unwrap();
        }
        DiscoveryService::new(registry, TransportSet::from_config(&TransportConfig::default()).unwrap())
    }

    #[tokio::test]
    async fn test_resolve_picks_transport_by_kind() {
        let dir = tempfile::tempdir().unwrap();
        let discovery = discovery(dir.path()).await;

        let beta = discovery.resolve("beta").await.unwrap();
        assert_eq!(beta.transport.kind(), TransportKind::ManagedApi);
        let alpha = discovery.resolve("alpha").await.unwrap();
        assert_eq!(alpha.transport.kind(), TransportKind::DirectSocket);
    }

    #[tokio::test]
    async fn test_unknown_agent_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let discovery = discovery(dir.path()).await;
        assert!(matches!(
            discovery.resolve("nobody").await,
            Err(ChorusError::AgentNotFound(ref name)) if name == "nobody"
        ));
    }

    #[tokio::test]
    async fn test_resolve_all_sorts_and_excludes() {
        let dir = tempfile::tempdir().unwrap();
        let discovery = discovery(dir.path()).await;

        let exclude: HashSet<String> = ["beta".to_string()].into_iter().collect();
        let names: Vec<String> = discovery
            .resolve_all(&exclude)
            .await
            .unwrap()
            .iter()
            .map(|agent| agent.name().to_string())
            .collect();
        assert_eq!(names, vec!["alpha".to_string(), "gamma".to_string()]);
    }
}
