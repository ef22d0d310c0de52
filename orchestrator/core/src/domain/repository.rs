// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Sundown State Repository
//!
//! Persistence contract for [`SundownState`] and the per-agent fresh-start
//! flag, implemented in `crate::infrastructure::repositories`.
//!
//! | Implementation | Backing |
//! |----------------|---------|
//! | `InMemorySundownRepository` | process memory (tests, embedded use) |
//! | `FileSundownRepository` | one JSON file per agent under the state directory |

use async_trait::async_trait;

use crate::domain::lifecycle::SundownState;

#[async_trait]
pub trait SundownRepository: Send + Sync {
    /// Store the latest state for `state.agent_name`, replacing any previous one.
    async fn save(&self, state: &SundownState) -> Result<(), RepositoryError>;

    /// Latest state for an agent without consuming it.
    async fn find_latest(&self, agent: &str) -> Result<Option<SundownState>, RepositoryError>;

    /// Remove and return the latest state (archiving it where supported).
    async fn consume(&self, agent: &str) -> Result<Option<SundownState>, RepositoryError>;

    /// All states that have not been consumed yet.
    async fn list_pending(&self) -> Result<Vec<SundownState>, RepositoryError>;

    async fn set_fresh_start(&self, agent: &str, needed: bool) -> Result<(), RepositoryError>;

    async fn needs_fresh_start(&self, agent: &str) -> Result<bool, RepositoryError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for RepositoryError {
    fn from(err: std::io::Error) -> Self {
        RepositoryError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
