// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of [`SundownRepository`].
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve sundown state
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! - **FileSundownRepository** - one JSON document per agent under the state
//!   directory; survives restarts
//! - **InMemorySundownRepository** - HashMap-backed storage for tests and
//!   embedded use

pub mod sundown;

pub use sundown::FileSundownRepository;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::domain::lifecycle::SundownState;
use crate::domain::repository::{RepositoryError, SundownRepository};

#[derive(Clone, Default)]
pub struct InMemorySundownRepository {
    states: Arc<RwLock<HashMap<String, SundownState>>>,
    fresh_start: Arc<RwLock<HashSet<String>>>,
}

impl InMemorySundownRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SundownRepository for InMemorySundownRepository {
    async fn save(&self, state: &SundownState) -> Result<(), RepositoryError> {
        self.states
            .write()
            .insert(state.agent_name.clone(), state.clone());
        Ok(())
    }

    async fn find_latest(&self, agent: &str) -> Result<Option<SundownState>, RepositoryError> {
        Ok(self.states.read().get(agent).cloned())
    }

    async fn consume(&self, agent: &str) -> Result<Option<SundownState>, RepositoryError> {
        Ok(self.states.write().remove(agent))
    }

    async fn list_pending(&self) -> Result<Vec<SundownState>, RepositoryError> {
        let mut states: Vec<SundownState> = self.states.read().values().cloned().collect();
        states.sort_by(|a, b| a.agent_name.cmp(&b.agent_name));
        Ok(states)
    }

    async fn set_fresh_start(&self, agent: &str, needed: bool) -> Result<(), RepositoryError> {
        let mut flags = self.fresh_start.write();
        if needed {
            flags.insert(agent.to_string());
        } else {
            flags.remove(agent);
        }
        Ok(())
    }

    async fn needs_fresh_start(&self, agent: &str) -> Result<bool, RepositoryError> {
        Ok(self.fresh_start.read().contains(agent))
    }
}
