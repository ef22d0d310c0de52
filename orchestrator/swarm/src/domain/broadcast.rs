// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Broadcast Aggregates
//!
//! - [`BroadcastJob`]: aggregate root for one fan-out; tracks per-target
//!   delivery status until every target is resolved.
//! - [`BroadcastEvent`]: one attributed item of the merged response stream.
//! - [`BroadcastOptions`]: timeouts, concurrency and exclusions for a round.
//! - [`TeamChatReport`]: a drained stream, grouped by outcome.

use chorus_core::domain::config::BroadcastConfig;
use chorus_core::domain::error::ErrorKind;
use chorus_core::domain::message::AgentResponse;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a [`BroadcastJob`]. Sent to agents in the
/// `x-chorus-broadcast-id` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BroadcastId(pub Uuid);

impl BroadcastId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BroadcastId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BroadcastId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    TimedOut,
    Failed,
}

impl DeliveryStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryStatus::Pending)
    }
}

/// Aggregate root for one fan-out.
///
/// # Invariants
///
/// - A target leaves `Pending` at most once; later results are rejected.
/// - The job is terminal once no target is `Pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastJob {
    pub id: BroadcastId,
    pub targets: Vec<String>,
    pub sent_at: DateTime<Utc>,
    delivery_status: BTreeMap<String, DeliveryStatus>,
}

impl BroadcastJob {
    pub fn new(targets: Vec<String>) -> Self {
        let delivery_status = targets
            .iter()
            .map(|target| (target.clone(), DeliveryStatus::Pending))
            .collect();
        Self {
            id: BroadcastId::new(),
            targets,
            sent_at: Utc::now(),
            delivery_status,
        }
    }

    pub fn status(&self, target: &str) -> Option<DeliveryStatus> {
        self.delivery_status.get(target).copied()
    }

    /// Moves a pending target to `status`. Returns false when the target is
    /// unknown or already resolved.
    pub fn resolve(&mut self, target: &str, status: DeliveryStatus) -> bool {
        match self.delivery_status.get_mut(target) {
            Some(current) if !current.is_terminal() && status.is_terminal() => {
                *current = status;
                true
            }
            _ => false,
        }
    }

    /// Marks every pending target with `status` and returns their names.
    pub fn resolve_pending(&mut self, status: DeliveryStatus) -> Vec<String> {
        let mut resolved = Vec::new();
        for (target, current) in self.delivery_status.iter_mut() {
            if !current.is_terminal() {
                *current = status;
                resolved.push(target.clone());
            }
        }
        resolved
    }

    pub fn pending(&self) -> Vec<String> {
        self.delivery_status
            .iter()
            .filter(|(_, status)| !status.is_terminal())
            .map(|(target, _)| target.clone())
            .collect()
    }

    pub fn is_terminal(&self) -> bool {
        self.delivery_status.values().all(DeliveryStatus::is_terminal)
    }

    pub fn delivery_status(&self) -> &BTreeMap<String, DeliveryStatus> {
        &self.delivery_status
    }
}

/// What happened to one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastEventKind {
    /// A streamed piece of the target's reply. Never terminal.
    Fragment { index: u32, content: String },
    Delivered { response: AgentResponse },
    TimedOut {
        #[serde(with = "humantime_serde")]
        after: Duration,
    },
    Failed { kind: ErrorKind, error: String },
}

impl BroadcastEventKind {
    pub fn status(&self) -> DeliveryStatus {
        match self {
            BroadcastEventKind::Fragment { .. } => DeliveryStatus::Pending,
            BroadcastEventKind::Delivered { .. } => DeliveryStatus::Delivered,
            BroadcastEventKind::TimedOut { .. } => DeliveryStatus::TimedOut,
            BroadcastEventKind::Failed { .. } => DeliveryStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastEvent {
    pub broadcast_id: BroadcastId,
    pub target: String,
    #[serde(flatten)]
    pub kind: BroadcastEventKind,
}

impl BroadcastEvent {
    pub fn new(broadcast_id: BroadcastId, target: impl Into<String>, kind: BroadcastEventKind) -> Self {
        Self {
            broadcast_id,
            target: target.into(),
            kind,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.status().is_terminal()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastOptions {
    /// Bound on each target's call, counted from when it gets a permit
    pub per_target_timeout: Duration,
    /// Optional cap on the whole fan-out
    pub job_timeout: Option<Duration>,
    pub max_concurrency: usize,
    /// Emit `Fragment` events as replies arrive
    pub streaming: bool,
    pub exclude: HashSet<String>,
}

impl BroadcastOptions {
    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn excluding<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_per_target_timeout(mut self, timeout: Duration) -> Self {
        self.per_target_timeout = timeout;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }
}

impl From<&BroadcastConfig> for BroadcastOptions {
    fn from(config: &BroadcastConfig) -> Self {
        Self {
            per_target_timeout: config.per_target_timeout,
            job_timeout: config.job_timeout,
            max_concurrency: config.max_concurrency,
            streaming: false,
            exclude: HashSet::new(),
        }
    }
}

impl Default for BroadcastOptions {
    fn default() -> Self {
        Self::from(&BroadcastConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetFailure {
    pub target: String,
    pub kind: ErrorKind,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetTimeout {
    pub target: String,
    #[serde(with = "humantime_serde")]
    pub after: Duration,
}

/// Outcome of one team-chat round, in arrival order within each group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamChatReport {
    pub broadcast_id: BroadcastId,
    pub targets: Vec<String>,
    pub responses: Vec<AgentResponse>,
    pub failures: Vec<TargetFailure>,
    pub timeouts: Vec<TargetTimeout>,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

impl TeamChatReport {
    pub fn new(broadcast_id: BroadcastId, targets: Vec<String>) -> Self {
        Self {
            broadcast_id,
            targets,
            responses: Vec::new(),
            failures: Vec::new(),
            timeouts: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// Files a terminal event under its outcome. Fragments are ignored; the
    /// `Delivered` event carries the assembled reply.
    pub fn record(&mut self, event: BroadcastEvent) {
        match event.kind {
            BroadcastEventKind::Fragment { .. } => {}
            BroadcastEventKind::Delivered { response } => self.responses.push(response),
            BroadcastEventKind::TimedOut { after } => self.timeouts.push(TargetTimeout {
                target: event.target,
                after,
            }),
            BroadcastEventKind::Failed { kind, error } => self.failures.push(TargetFailure {
                target: event.target,
                kind,
                error,
            }),
        }
    }

    pub fn resolved(&self) -> usize {
        self.responses.len() + self.failures.len() + self.timeouts.len()
    }

    pub fn all_delivered(&self) -> bool {
        self.responses.len() == self.targets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> BroadcastJob {
        BroadcastJob::new(vec!["alpha".to_string(), "beta".to_string()])
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = job();
        assert_eq!(job.status("alpha"), Some(DeliveryStatus::Pending));
        assert_eq!(job.pending(), vec!["alpha".to_string(), "beta".to_string()]);
        assert!(!job.is_terminal());
    }

    #[test]
    fn test_target_resolves_once() {
        let mut job = job();
        assert!(job.resolve("alpha", DeliveryStatus::Delivered));
        assert!(!job.resolve("alpha", DeliveryStatus::Failed));
        assert_eq!(job.status("alpha"), Some(DeliveryStatus::Delivered));
        assert!(!job.resolve("gamma", DeliveryStatus::Delivered));
        assert!(!job.resolve("beta", DeliveryStatus::Pending));
    }

    #[test]
    fn test_resolve_pending_marks_only_unresolved_targets() {
        let mut job = job();
        job.resolve("alpha", DeliveryStatus::Delivered);
        assert_eq!(job.resolve_pending(DeliveryStatus::TimedOut), vec!["beta".to_string()]);
        assert!(job.is_terminal());
        assert_eq!(job.status("alpha"), Some(DeliveryStatus::Delivered));
    }

    #[test]
    fn test_empty_job_is_terminal() {
        assert!(BroadcastJob::new(Vec::new()).is_terminal());
    }

    #[test]
    fn test_report_groups_terminal_events() {
        let id = BroadcastId::new();
        let mut report = TeamChatReport::new(id, vec!["a".into(), "b".into(), "c".into()]);
        report.record(BroadcastEvent::new(
            id,
            "a",
            BroadcastEventKind::Fragment {
                index: 0,
                content: "partial".into(),
            },
        ));
        report.record(BroadcastEvent::new(
            id,
            "b",
            BroadcastEventKind::TimedOut {
                after: Duration::from_secs(2),
            },
        ));
        report.record(BroadcastEvent::new(
            id,
            "c",
            BroadcastEventKind::Failed {
                kind: ErrorKind::AgentUnreachable,
                error: "connection refused".into(),
            },
        ));

        assert_eq!(report.resolved(), 2);
        assert_eq!(report.timeouts[0].target, "b");
        assert_eq!(report.failures[0].kind, ErrorKind::AgentUnreachable);
        assert!(!report.all_delivered());
    }

    #[test]
    fn test_event_serializes_flat() {
        let event = BroadcastEvent::new(
            BroadcastId::new(),
            "alpha",
            BroadcastEventKind::TimedOut {
                after: Duration::from_secs(30),
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "timed_out");
        assert_eq!(json["target"], "alpha");
        assert_eq!(json["after"], "30s");
    }
}
