// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Service wiring - Application Layer
//!
//! Builds the registry client, discovery, budget tracker, lifecycle manager
//! and messenger from one [`ChorusConfig`], sharing a single [`EventBus`].
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Composition root used by the CLI, the SDK and tests

use anyhow::Context;
use std::sync::Arc;

use crate::application::budget::ContextBudgetTracker;
use crate::application::discovery::DiscoveryService;
use crate::application::lifecycle::LifecycleManager;
use crate::application::messenger::AgentMessenger;
use crate::application::registry::RegistryClient;
use crate::domain::config::{ChorusConfig, LifecycleConfig};
use crate::domain::repository::SundownRepository;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::repositories::FileSundownRepository;
use crate::infrastructure::transport::TransportSet;

/// Creates the file-backed sundown repository for the configured state directory.
pub fn create_sundown_repository(config: &LifecycleConfig) -> Arc<dyn SundownRepository> {
    Arc::new(FileSundownRepository::new(&config.state_dir, config.archive))
}

#[derive(Clone)]
pub struct ChorusContext {
    pub config: ChorusConfig,
    pub event_bus: EventBus,
    pub registry: RegistryClient,
    pub discovery: DiscoveryService,
    pub budgets: Arc<ContextBudgetTracker>,
    pub lifecycle: Arc<LifecycleManager>,
    pub messenger: AgentMessenger,
}

impl ChorusContext {
    /// Production wiring: file registry, socket + managed-API transports and
    /// the file-backed sundown repository.
    pub fn from_config(config: ChorusConfig) -> anyhow::Result<Self> {
        let transports = TransportSet::from_config(&config.spec.transport)
            .context("Failed to build transports")?;
        let repository = create_sundown_repository(&config.spec.lifecycle);
        Self::with_parts(config, transports, repository)
    }

    /// Wiring with caller-supplied transports and repository.
    pub fn with_parts(
        config: ChorusConfig,
        transports: TransportSet,
        repository: Arc<dyn SundownRepository>,
    ) -> anyhow::Result<Self> {
        let event_bus = EventBus::with_default_capacity();
        let registry = RegistryClient::open(&config.spec.registry, event_bus.clone()).with_context(|| {
            format!(
                "Failed to open registry at {}",
                config.spec.registry.path.display()
            )
        })?;
        let discovery = DiscoveryService::new(registry.clone(), transports);
        let budgets = Arc::new(ContextBudgetTracker::new(
            config.spec.budget.clone(),
            event_bus.clone(),
        ));
        let lifecycle = Arc::new(LifecycleManager::new(
            discovery.clone(),
            repository,
            budgets.clone(),
            config.spec.lifecycle.clone(),
            event_bus.clone(),
        ));
        let messenger = AgentMessenger::new(discovery.clone(), budgets.clone(), lifecycle.clone());

        Ok(Self {
            config,
            event_bus,
            registry,
            discovery,
            budgets,
            lifecycle,
            messenger,
        })
    }
}
