// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::budget::Severity;
use crate::domain::lifecycle::{SummarySource, SundownReason};

/// Events emitted by the registry client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RegistryEvent {
    AgentRegistered {
        name: String,
        port: Option<u16>,
        took_over: bool,
        registered_at: DateTime<Utc>,
    },
    AgentDeregistered {
        name: String,
        deregistered_at: DateTime<Utc>,
    },
    StaleEntryReaped {
        name: String,
        last_seen: DateTime<Utc>,
        reaped_at: DateTime<Utc>,
    },
}

/// Events emitted by the budget tracker and lifecycle manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ContextEvent {
    SeverityEscalated {
        agent: String,
        from: Severity,
        to: Severity,
        usage: u64,
        escalated_at: DateTime<Utc>,
    },
    SundownCompleted {
        agent: String,
        reason: SundownReason,
        source: SummarySource,
        completed_at: DateTime<Utc>,
    },
    SunriseCompleted {
        agent: String,
        restored: bool,
        completed_at: DateTime<Utc>,
    },
}
