// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Error umbrella for callers that cross component boundaries.
//!
//! Each area keeps its own `thiserror` enum; [`ChorusError`] wraps them and
//! [`ErrorKind`] classifies any of them into the operator-facing taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::budget::BudgetError;
use crate::domain::lifecycle::LifecycleError;
use crate::domain::registry::RegistryError;
use crate::domain::repository::RepositoryError;
use crate::domain::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum ChorusError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Budget(#[from] BudgetError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("agent '{0}' is not registered")]
    AgentNotFound(String),

    #[error("no preserved state to restore for '{0}'")]
    NoStateToRestore(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AllocationExhausted,
    NameConflict,
    RegistryCorrupt,
    AgentNotFound,
    AgentUnreachable,
    AgentTimeout,
    BudgetExceeded,
    SummaryFailed,
    NoStateToRestore,
    Other,
}

impl ChorusError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChorusError::Registry(RegistryError::AllocationExhausted { .. }) => {
                ErrorKind::AllocationExhausted
            }
            ChorusError::Registry(RegistryError::NameConflict(_)) => ErrorKind::NameConflict,
            ChorusError::Registry(RegistryError::Corrupt { .. }) => ErrorKind::RegistryCorrupt,
            ChorusError::Registry(_) => ErrorKind::Other,
            ChorusError::Transport(TransportError::Timeout { .. }) => ErrorKind::AgentTimeout,
            ChorusError::Transport(TransportError::Unsupported(_)) => ErrorKind::Other,
            ChorusError::Transport(_) => ErrorKind::AgentUnreachable,
            ChorusError::Budget(BudgetError::Exceeded { .. }) => ErrorKind::BudgetExceeded,
            ChorusError::Budget(_) => ErrorKind::Other,
            ChorusError::Lifecycle(LifecycleError::SummaryFailed { .. }) => ErrorKind::SummaryFailed,
            ChorusError::Lifecycle(LifecycleError::AgentNotFound(_)) => ErrorKind::AgentNotFound,
            ChorusError::Lifecycle(LifecycleError::AgentUnreachable { .. }) => {
                ErrorKind::AgentUnreachable
            }
            ChorusError::Lifecycle(LifecycleError::Repository(_)) => ErrorKind::Other,
            ChorusError::Repository(_) => ErrorKind::Other,
            ChorusError::AgentNotFound(_) => ErrorKind::AgentNotFound,
            ChorusError::NoStateToRestore(_) => ErrorKind::NoStateToRestore,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::AllocationExhausted => "allocation exhausted",
            ErrorKind::NameConflict => "name conflict",
            ErrorKind::RegistryCorrupt => "registry corrupt",
            ErrorKind::AgentNotFound => "agent not found",
            ErrorKind::AgentUnreachable => "agent unreachable",
            ErrorKind::AgentTimeout => "agent timeout",
            ErrorKind::BudgetExceeded => "budget exceeded",
            ErrorKind::SummaryFailed => "summary failed",
            ErrorKind::NoStateToRestore => "no state to restore",
            ErrorKind::Other => "error",
        };
        f.write_str(label)
    }
}
