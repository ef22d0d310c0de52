// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Sundown / Sunrise Domain
//!
//! [`SundownState`] is the snapshot captured before a context reset. The
//! payload is written by the agent itself in answer to [`summary_request`];
//! when the agent cannot answer, a mechanical fallback (timestamp + reason)
//! is stored instead so the event is never lost.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::budget::Severity;
use crate::domain::repository::RepositoryError;

const RESTORE_OPEN: &str = "=== SUNRISE: RESTORED CONTEXT ===";
const RESTORE_CLOSE: &str = "=== END RESTORED CONTEXT ===";
const DECISION_MARKERS: [&str; 5] = ["decision:", "decided:", "conclusion:", "agreed:", "will:"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SundownReason {
    /// Requested by an operator or another component.
    Manual(String),
    /// Budget tracker crossed into the preservation band.
    Threshold(Severity),
}

impl fmt::Display for SundownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SundownReason::Manual(reason) if reason.is_empty() => write!(f, "manual"),
            SundownReason::Manual(reason) => write!(f, "manual: {}", reason),
            SundownReason::Threshold(severity) => write!(f, "context budget reached {}", severity),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummarySource {
    Agent,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SundownState {
    pub agent_name: String,
    pub captured_at: DateTime<Utc>,
    pub reason: SundownReason,
    pub preserved_payload: String,
    pub source: SummarySource,
    pub resume_hint: String,
    #[serde(default)]
    pub usage_at_capture: u64,
}

impl SundownState {
    /// State built from the agent's own summary.
    pub fn authored(agent: &str, reason: SundownReason, summary: String, usage: u64) -> Self {
        Self::build(agent, Utc::now(), reason, summary, SummarySource::Agent, usage)
    }

    /// Minimal snapshot used when the agent could not produce a summary.
    pub fn fallback(agent: &str, reason: SundownReason, usage: u64) -> Self {
        let captured_at = Utc::now();
        let payload = format!(
            "No summary was captured for {} at {} ({}). Ask the operator for context before continuing.",
            agent,
            captured_at.to_rfc3339(),
            reason
        );
        Self::build(agent, captured_at, reason, payload, SummarySource::Fallback, usage)
    }

    fn build(
        agent: &str,
        captured_at: DateTime<Utc>,
        reason: SundownReason,
        payload: String,
        source: SummarySource,
        usage: u64,
    ) -> Self {
        let resume_hint = render_resume_hint(captured_at, &reason, &payload);
        Self {
            agent_name: agent.to_string(),
            captured_at,
            reason,
            preserved_payload: payload,
            source,
            resume_hint,
            usage_at_capture: usage,
        }
    }
}

/// Result of a sundown. `summary_error` is set when the fallback path ran.
#[derive(Debug, Clone)]
pub struct SundownOutcome {
    pub state: SundownState,
    pub summary_error: Option<LifecycleError>,
}

impl SundownOutcome {
    pub fn is_degraded(&self) -> bool {
        self.summary_error.is_some()
    }
}

/// Result of a sunrise. An empty `resume_hint` means nothing was preserved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sunrise {
    pub resume_hint: String,
    pub restored: Option<SundownState>,
    /// Whether the fresh-start flag was set before this sunrise cleared it.
    pub fresh_start: bool,
}

impl Sunrise {
    pub fn is_empty(&self) -> bool {
        self.restored.is_none()
    }
}

/// Prompt sent to an agent asking it to summarize what it needs to carry
/// across a context reset.
pub fn summary_request(reason: &SundownReason) -> String {
    format!(
        "Your context is about to be reset ({reason}). Write the notes you will need to \
         continue seamlessly afterwards. Include:\n\
         1. Current context: what you are working on\n\
         2. Key decisions, one per line prefixed with 'Decision:'\n\
         3. Progress made so far\n\
         4. Unfinished work\n\
         5. Next steps\n\
         6. Anything else you must not forget\n\
         Be concise but complete. Reply with the notes only."
    )
}

/// Lines of a summary that record decisions.
pub fn key_decisions(payload: &str) -> Vec<String> {
    payload
        .lines()
        .map(str::trim)
        .filter(|line| {
            let lower = line.to_lowercase();
            DECISION_MARKERS.iter().any(|marker| lower.contains(marker))
        })
        .map(str::to_string)
        .collect()
}

fn render_resume_hint(captured_at: DateTime<Utc>, reason: &SundownReason, payload: &str) -> String {
    let mut hint = format!(
        "{RESTORE_OPEN}\nPreserved at: {}\nReason: {}\n\n{}\n",
        captured_at.to_rfc3339(),
        reason,
        payload.trim()
    );
    let decisions = key_decisions(payload);
    if !decisions.is_empty() {
        hint.push_str("\nKey decisions:\n");
        for decision in decisions {
            hint.push_str("- ");
            hint.push_str(&decision);
            hint.push('\n');
        }
    }
    hint.push_str(RESTORE_CLOSE);
    hint
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum LifecycleError {
    #[error("agent '{agent}' did not produce a summary: {reason}")]
    SummaryFailed { agent: String, reason: String },

    #[error("agent '{0}' is not registered")]
    AgentNotFound(String),

    #[error("agent '{agent}' is unreachable: {reason}")]
    AgentUnreachable { agent: String, reason: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_hint_contains_payload_and_decisions() {
        let state = SundownState::authored(
            "gamma",
            SundownReason::Threshold(Severity::AutoPreserve),
            "Working on the parser.\nDecision: use NDJSON framing\nNext: tests".to_string(),
            8_600,
        );

        assert_eq!(state.source, SummarySource::Agent);
        assert!(state.resume_hint.starts_with(RESTORE_OPEN));
        assert!(state.resume_hint.ends_with(RESTORE_CLOSE));
        assert!(state.resume_hint.contains("Working on the parser."));
        assert!(state.resume_hint.contains("- Decision: use NDJSON framing"));
        assert!(state.resume_hint.contains("auto-preserve"));
    }

    #[test]
    fn test_fallback_records_reason() {
        let state = SundownState::fallback("gamma", SundownReason::Manual("shift change".into()), 0);
        assert_eq!(state.source, SummarySource::Fallback);
        assert!(state.preserved_payload.contains("shift change"));
        assert!(state.resume_hint.contains("Reason: manual: shift change"));
    }

    #[test]
    fn test_key_decisions_are_case_insensitive() {
        let payload = "We AGREED: ship friday\nnothing here\n  decided: keep ports  ";
        assert_eq!(
            key_decisions(payload),
            vec!["We AGREED: ship friday".to_string(), "decided: keep ports".to_string()]
        );
    }

    #[test]
    fn test_summary_request_mentions_reason() {
        let prompt = summary_request(&SundownReason::Manual("end of day".into()));
        assert!(prompt.contains("manual: end of day"));
        assert!(prompt.contains("Next steps"));
    }
}
