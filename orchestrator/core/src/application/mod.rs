// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod registry;
pub mod discovery;
pub mod budget;
pub mod lifecycle;
pub mod messenger;
pub mod bootstrap;

// Re-export services for convenience
pub use bootstrap::{create_sundown_repository, ChorusContext};
pub use budget::ContextBudgetTracker;
pub use discovery::{DiscoveryService, ResolvedAgent};
pub use lifecycle::LifecycleManager;
pub use messenger::AgentMessenger;
pub use registry::{Registration, RegistryClient};
