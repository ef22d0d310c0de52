// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Context Budget Domain
//!
//! Per-agent token accounting against a model-specific context window.
//!
//! Severity is a high-water mark: it rises with usage through
//! `Normal -> Warn -> SuggestPreserve -> AutoPreserve -> Critical` and only
//! [`TokenBudget::reset`] (performed by sunrise) brings it back to `Normal`.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Normal,
    Warn,
    SuggestPreserve,
    AutoPreserve,
    Critical,
}

impl Severity {
    /// Severities at which state is preserved without being asked.
    pub fn requires_preservation(&self) -> bool {
        *self >= Severity::AutoPreserve
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Normal => "normal",
            Severity::Warn => "warn",
            Severity::SuggestPreserve => "suggest-preserve",
            Severity::AutoPreserve => "auto-preserve",
            Severity::Critical => "critical",
        };
        f.write_str(label)
    }
}

/// Fractions of the window set aside for each part of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetAllocation {
    #[serde(default = "default_system_share")]
    pub system: f64,
    #[serde(default = "default_history_share")]
    pub history: f64,
    #[serde(default = "default_working_share")]
    pub working: f64,
    #[serde(default = "default_response_share")]
    pub response: f64,
}

impl BudgetAllocation {
    pub fn total(&self) -> f64 {
        self.system + self.history + self.working + self.response
    }

    /// Token counts per share for a given window.
    pub fn split(&self, window_size: u64) -> AllocationSplit {
        let share = |fraction: f64| (window_size as f64 * fraction).round() as u64;
        AllocationSplit {
            system: share(self.system),
            history: share(self.history),
            working: share(self.working),
            response: share(self.response),
        }
    }
}

impl Default for BudgetAllocation {
    fn default() -> Self {
        Self {
            system: default_system_share(),
            history: default_history_share(),
            working: default_working_share(),
            response: default_response_share(),
        }
    }
}

fn default_system_share() -> f64 {
    0.10
}

fn default_history_share() -> f64 {
    0.50
}

fn default_working_share() -> f64 {
    0.25
}

fn default_response_share() -> f64 {
    0.15
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationSplit {
    pub system: u64,
    pub history: u64,
    pub working: u64,
    pub response: u64,
}

/// Utilization fractions at which each severity begins.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_warn")]
    pub warn: f64,
    #[serde(default = "default_suggest_preserve")]
    pub suggest_preserve: f64,
    #[serde(default = "default_auto_preserve")]
    pub auto_preserve: f64,
    #[serde(default = "default_critical")]
    pub critical: f64,
}

impl Thresholds {
    pub fn classify(&self, utilization: f64) -> Severity {
        if utilization >= self.critical {
            Severity::Critical
        } else if utilization >= self.auto_preserve {
            Severity::AutoPreserve
        } else if utilization >= self.suggest_preserve {
            Severity::SuggestPreserve
        } else if utilization >= self.warn {
            Severity::Warn
        } else {
            Severity::Normal
        }
    }

    pub fn is_ordered(&self) -> bool {
        0.0 < self.warn
            && self.warn <= self.suggest_preserve
            && self.suggest_preserve <= self.auto_preserve
            && self.auto_preserve <= self.critical
            && self.critical <= 1.0
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warn: default_warn(),
            suggest_preserve: default_suggest_preserve(),
            auto_preserve: default_auto_preserve(),
            critical: default_critical(),
        }
    }
}

fn default_warn() -> f64 {
    0.60
}

fn default_suggest_preserve() -> f64 {
    0.70
}

fn default_auto_preserve() -> f64 {
    0.85
}

fn default_critical() -> f64 {
    0.95
}

/// Window size and tokenization characteristics of one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    pub name: String,
    pub window_size: u64,
    /// Average characters per token. Lower values estimate more tokens.
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: f64,
    /// Overrides the default allocation for this model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation: Option<BudgetAllocation>,
}

impl ModelProfile {
    pub fn new(name: impl Into<String>, window_size: u64) -> Self {
        Self {
            name: name.into(),
            window_size,
            chars_per_token: default_chars_per_token(),
            allocation: None,
        }
    }
}

fn default_chars_per_token() -> f64 {
    3.5
}

/// Text about to be sent to an agent, split by role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingExchange {
    pub system: Option<String>,
    pub turns: Vec<String>,
}

impl PendingExchange {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            system: None,
            turns: vec![body.into()],
        }
    }

    /// Prepends a turn, e.g. a sunrise resume hint.
    pub fn with_leading_turn(mut self, turn: impl Into<String>) -> Self {
        self.turns.insert(0, turn.into());
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// Conservative character-based estimator. Rounds up at every step and adds a
/// safety margin plus a fixed per-turn overhead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenEstimator {
    pub safety_margin: f64,
    pub turn_overhead: u64,
}

impl TokenEstimator {
    pub fn estimate_text(&self, profile: &ModelProfile, text: &str) -> u64 {
        let chars = text.chars().count() as f64;
        let ratio = if profile.chars_per_token > 0.0 {
            profile.chars_per_token
        } else {
            1.0
        };
        let raw = (chars / ratio).ceil();
        (raw * (1.0 + self.safety_margin.max(0.0))).ceil() as u64 + self.turn_overhead
    }

    pub fn estimate(&self, profile: &ModelProfile, exchange: &PendingExchange) -> u64 {
        exchange
            .system
            .iter()
            .chain(exchange.turns.iter())
            .map(|text| self.estimate_text(profile, text))
            .sum()
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self {
            safety_margin: 0.10,
            turn_overhead: 4,
        }
    }
}

/// Usage and severity for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBudget {
    pub agent: String,
    pub model: String,
    pub window_size: u64,
    pub allocation: BudgetAllocation,
    pub thresholds: Thresholds,
    pub current_usage: u64,
    pub severity: Severity,
}

impl TokenBudget {
    pub fn new(
        agent: impl Into<String>,
        profile: &ModelProfile,
        default_allocation: BudgetAllocation,
        thresholds: Thresholds,
    ) -> Self {
        Self {
            agent: agent.into(),
            model: profile.name.clone(),
            window_size: profile.window_size,
            allocation: profile.allocation.unwrap_or(default_allocation),
            thresholds,
            current_usage: 0,
            severity: Severity::Normal,
        }
    }

    pub fn utilization(&self) -> f64 {
        if self.window_size == 0 {
            return 1.0;
        }
        self.current_usage as f64 / self.window_size as f64
    }

    /// Tokens available to input before the response share is touched.
    pub fn input_capacity(&self) -> u64 {
        let split = self.allocation.split(self.window_size);
        self.window_size.saturating_sub(split.response)
    }

    /// Tokens still available for input.
    pub fn remaining_input(&self) -> u64 {
        self.input_capacity().saturating_sub(self.current_usage)
    }

    pub fn record(&mut self, tokens: u64) -> UsageUpdate {
        let previous = self.severity;
        self.current_usage = self.current_usage.saturating_add(tokens);
        let observed = self.thresholds.classify(self.utilization());
        self.severity = previous.max(observed);
        UsageUpdate {
            agent: self.agent.clone(),
            previous,
            current: self.severity,
            usage: self.current_usage,
            utilization: self.utilization(),
        }
    }

    pub fn reset(&mut self) {
        self.current_usage = 0;
        self.severity = Severity::Normal;
    }
}

/// Result of recording usage.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageUpdate {
    pub agent: String,
    pub previous: Severity,
    pub current: Severity,
    pub usage: u64,
    pub utilization: f64,
}

impl UsageUpdate {
    pub fn escalated(&self) -> bool {
        self.current > self.previous
    }

    /// True only for the update that moved the budget into the preservation
    /// band. Later updates while already in the band return false.
    pub fn crossed_preserve(&self) -> bool {
        !self.previous.requires_preservation() && self.current.requires_preservation()
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BudgetError {
    #[error(
        "exchange for '{agent}' needs ~{requested} tokens but only {available} remain before the response reserve"
    )]
    Exceeded {
        agent: String,
        requested: u64,
        available: u64,
    },

    #[error("unknown model '{0}'")]
    UnknownModel(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(window: u64) -> TokenBudget {
        TokenBudget::new(
            "gamma",
            &ModelProfile::new("test-model", window),
            BudgetAllocation::default(),
            Thresholds::default(),
        )
    }

    #[test]
    fn test_severity_is_a_high_water_mark() {
        let mut budget = budget(10_000);
        assert_eq!(budget.record(6_100).current, Severity::Warn);
        assert_eq!(budget.record(1_000).current, Severity::SuggestPreserve);

        // Usage never decreases, but even an explicit lower reading must not
        // lower the severity.
        budget.current_usage = 100;
        let update = budget.record(0);
        assert_eq!(update.current, Severity::SuggestPreserve);

        budget.reset();
        assert_eq!(budget.severity, Severity::Normal);
        assert_eq!(budget.current_usage, 0);
    }

    #[test]
    fn test_crossed_preserve_fires_once() {
        let mut budget = budget(10_000);
        let first = budget.record(8_600);
        assert_eq!(first.current, Severity::AutoPreserve);
        assert!(first.crossed_preserve());

        let second = budget.record(100);
        assert!(!second.crossed_preserve());

        let third = budget.record(1_000);
        assert_eq!(third.current, Severity::Critical);
        assert!(!third.crossed_preserve());
        assert!(third.escalated());
    }

    #[test]
    fn test_jump_straight_to_critical_counts_as_crossing() {
        let mut budget = budget(1_000);
        let update = budget.record(990);
        assert_eq!(update.current, Severity::Critical);
        assert!(update.crossed_preserve());
    }

    #[test]
    fn test_estimator_rounds_up() {
        let estimator = TokenEstimator::default();
        let profile = ModelProfile::new("m", 8_000);
        // 7 chars / 3.5 = 2 tokens, * 1.1 = 2.2 -> 3, + 4 overhead
        assert_eq!(estimator.estimate_text(&profile, "abcdefg"), 7);
        let exchange = PendingExchange::new("abcdefg").with_system("abcdefg");
        assert_eq!(estimator.estimate(&profile, &exchange), 14);
    }

    #[test]
    fn test_input_capacity_excludes_response_share() {
        let budget = budget(10_000);
        assert_eq!(budget.input_capacity(), 8_500);
        assert_eq!(budget.remaining_input(), 8_500);
    }

    #[test]
    fn test_threshold_ordering() {
        assert!(Thresholds::default().is_ordered());
        let broken = Thresholds { warn: 0.9, ..Thresholds::default() };
        assert!(!broken.is_ordered());
    }
}
