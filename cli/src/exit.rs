// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Process exit codes.
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | success |
//! | 1 | general failure |
//! | 2 | agent not found |
//! | 3 | agent unreachable, including a sundown that fell back because the agent could not be reached |
//! | 4 | no state to restore |

use chorus_core::domain::error::{ChorusError, ErrorKind};
use chorus_core::domain::lifecycle::{LifecycleError, SundownOutcome};
use chorus_core::domain::registry::RegistryError;
use chorus_core::domain::transport::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Failure,
    AgentNotFound,
    AgentUnreachable,
    NoStateToRestore,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failure => 1,
            ExitStatus::AgentNotFound => 2,
            ExitStatus::AgentUnreachable => 3,
            ExitStatus::NoStateToRestore => 4,
        }
    }

    pub fn from_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::AgentNotFound => ExitStatus::AgentNotFound,
            ErrorKind::AgentUnreachable | ErrorKind::AgentTimeout => ExitStatus::AgentUnreachable,
            ErrorKind::NoStateToRestore => ExitStatus::NoStateToRestore,
            _ => ExitStatus::Failure,
        }
    }

    /// Classifies the first Chorus error found in the chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(e) = cause.downcast_ref::<ChorusError>() {
                return Self::from_kind(e.kind());
            }
            if let Some(e) = cause.downcast_ref::<LifecycleError>() {
                return Self::from_kind(ChorusError::Lifecycle(e.clone()).kind());
            }
            if let Some(e) = cause.downcast_ref::<TransportError>() {
                return match e {
                    TransportError::Unsupported(_) => ExitStatus::Failure,
                    _ => ExitStatus::AgentUnreachable,
                };
            }
            if cause.downcast_ref::<RegistryError>().is_some() {
                return ExitStatus::Failure;
            }
        }
        ExitStatus::Failure
    }

    /// A completed sundown always stored something; the code reports why the
    /// agent's own summary is missing, if it is.
    pub fn from_sundown(outcome: &SundownOutcome) -> Self {
        match &outcome.summary_error {
            None => ExitStatus::Success,
            Some(LifecycleError::AgentUnreachable { .. }) => ExitStatus::AgentUnreachable,
            Some(_) => ExitStatus::Failure,
        }
    }
}
