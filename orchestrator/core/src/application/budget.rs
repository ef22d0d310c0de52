// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Context Budget Tracker
//!
//! Keeps one [`TokenBudget`] per agent in a `DashMap`. Budgets are created
//! lazily with the model advertised in the agent's registry metadata, or the
//! configured default model.

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::domain::budget::{
    BudgetError, ModelProfile, PendingExchange, Severity, TokenBudget, TokenEstimator, UsageUpdate,
};
use crate::domain::config::BudgetConfig;
use crate::domain::events::ContextEvent;
use crate::infrastructure::event_bus::EventBus;

/// Window assumed when the configured default model is missing from the table.
const FALLBACK_WINDOW: u64 = 32_000;

pub struct ContextBudgetTracker {
    budgets: DashMap<String, TokenBudget>,
    config: BudgetConfig,
    estimator: TokenEstimator,
    event_bus: EventBus,
}

impl ContextBudgetTracker {
    pub fn new(config: BudgetConfig, event_bus: EventBus) -> Self {
        Self {
            budgets: DashMap::new(),
            estimator: config.estimator(),
            config,
            event_bus,
        }
    }

    /// Strict lookup in the model table.
    pub fn profile(&self, model: &str) -> Result<&ModelProfile, BudgetError> {
        self.config
            .model(model)
            .ok_or_else(|| BudgetError::UnknownModel(model.to_string()))
    }

    fn resolve_profile(&self, model: Option<&str>) -> ModelProfile {
        if let Some(name) = model {
            match self.profile(name) {
                Ok(profile) => return profile.clone(),
                Err(e) => warn!(error = %e, default = %self.config.default_model, "Falling back to default model"),
            }
        }
        self.config
            .model(&self.config.default_model)
            .cloned()
            .unwrap_or_else(|| ModelProfile::new(self.config.default_model.clone(), FALLBACK_WINDOW))
    }

    /// Creates the agent's budget if it does not exist yet. An existing budget
    /// keeps its model.
    pub fn ensure(&self, agent: &str, model: Option<&str>) {
        if self.budgets.contains_key(agent) {
            return;
        }
        let profile = self.resolve_profile(model);
        debug!(agent, model = %profile.name, window = profile.window_size, "Tracking context budget");
        self.budgets.entry(agent.to_string()).or_insert_with(|| {
            TokenBudget::new(agent, &profile, self.config.allocation, self.config.thresholds)
        });
    }

    pub fn estimate(&self, agent: &str, exchange: &PendingExchange) -> u64 {
        let model = self.budgets.get(agent).map(|budget| budget.model.clone());
        let profile = self.resolve_profile(model.as_deref());
        self.estimator.estimate(&profile, exchange)
    }

    /// Estimates the exchange and checks it fits before the response reserve.
    /// Returns the estimate.
    pub fn preflight(&self, agent: &str, exchange: &PendingExchange) -> Result<u64, BudgetError> {
        self.ensure(agent, None);
        let estimate = self.estimate(agent, exchange);
        let available = self
            .budgets
            .get(agent)
            .map(|budget| budget.remaining_input())
            .unwrap_or(0);

        if estimate > available {
            warn!(agent, estimate, available, "Exchange does not fit the context budget");
            return Err(BudgetError::Exceeded {
                agent: agent.to_string(),
                requested: estimate,
                available,
            });
        }
        Ok(estimate)
    }

    pub fn record_usage(&self, agent: &str, tokens: u64) -> UsageUpdate {
        self.ensure(agent, None);
        let update = match self.budgets.get_mut(agent) {
            Some(mut budget) => budget.record(tokens),
            None => {
                let profile = self.resolve_profile(None);
                let mut budget =
                    TokenBudget::new(agent, &profile, self.config.allocation, self.config.thresholds);
                let update = budget.record(tokens);
                self.budgets.insert(agent.to_string(), budget);
                update
            }
        };

        if update.escalated() {
            if update.current >= Severity::SuggestPreserve {
                warn!(
                    agent,
                    from = %update.previous,
                    to = %update.current,
                    usage = update.usage,
                    utilization = update.utilization,
                    "Context severity escalated"
                );
            } else {
                info!(agent, to = %update.current, usage = update.usage, "Context severity escalated");
            }
            self.event_bus.publish_context_event(ContextEvent::SeverityEscalated {
                agent: agent.to_string(),
                from: update.previous,
                to: update.current,
                usage: update.usage,
                escalated_at: Utc::now(),
            });
        }
        update
    }

    /// Current severity, or `None` while Normal.
    pub fn check_thresholds(&self, agent: &str) -> Option<Severity> {
        self.budgets
            .get(agent)
            .map(|budget| budget.severity)
            .filter(|severity| *severity > Severity::Normal)
    }

    pub fn reset(&self, agent: &str) {
        if let Some(mut budget) = self.budgets.get_mut(agent) {
            budget.reset();
            info!(agent, "Context budget reset");
        }
    }

    pub fn snapshot(&self, agent: &str) -> Option<TokenBudget> {
        self.budgets.get(agent).map(|budget| budget.clone())
    }

    pub fn snapshot_all(&self) -> Vec<TokenBudget> {
        let mut budgets: Vec<TokenBudget> = self.budgets.iter().map(|budget| budget.clone()).collect();
        budgets.sort_by(|a, b| a.agent.cmp(&b.agent));
        budgets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::event_bus::DomainEvent;

    fn tracker() -> (ContextBudgetTracker, EventBus) {
        let config = BudgetConfig {
            default_model: "small".to_string(),
            models: vec![ModelProfile::new("small", 10_000), ModelProfile::new("large", 100_000)],
            ..BudgetConfig::default()
        };
        let bus = EventBus::new(16);
        (ContextBudgetTracker::new(config, bus.clone()), bus)
    }

    #[test]
    fn test_crossing_auto_preserve_is_reported_once() {
        let (tracker, bus) = tracker();
        let mut events = bus.subscribe();
        tracker.ensure("gamma", Some("small"));

        let update = tracker.record_usage("gamma", 8_600);
        assert_eq!(update.current, Severity::AutoPreserve);
        assert!(update.crossed_preserve());
        assert_eq!(tracker.check_thresholds("gamma"), Some(Severity::AutoPreserve));

        let again = tracker.record_usage("gamma", 100);
        assert!(!again.crossed_preserve());
        assert_eq!(events.drain().len(), 1);
        assert!(matches!(
            tracker.snapshot("gamma").unwrap(),
            TokenBudget { current_usage: 8_700, .. }
        ));
    }

    #[test]
    fn test_preflight_rejects_exchange_past_response_reserve() {
        let (tracker, _) = tracker();
        tracker.ensure("gamma", Some("small"));
        tracker.record_usage("gamma", 8_000);

        // 8_500 input capacity, 500 left.
        let fits = PendingExchange::new("x".repeat(350));
        assert!(tracker.preflight("gamma", &fits).is_ok());

        let too_big = PendingExchange::new("x".repeat(3_500));
        match tracker.preflight("gamma", &too_big) {
            Err(BudgetError::Exceeded { available, .. }) => assert_eq!(available, 500),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_model_falls_back_to_default() {
        let (tracker, _) = tracker();
        tracker.ensure("delta", Some("mystery"));
        assert_eq!(tracker.snapshot("delta").unwrap().model, "small");
        assert!(matches!(tracker.profile("mystery"), Err(BudgetError::UnknownModel(_))));
    }

    #[test]
    fn test_reset_returns_to_normal_and_publishes_escalations() {
        let (tracker, bus) = tracker();
        let mut events = bus.subscribe();
        tracker.ensure("gamma", Some("large"));
        tracker.record_usage("gamma", 61_000);
        assert_eq!(tracker.check_thresholds("gamma"), Some(Severity::Warn));

        tracker.reset("gamma");
        assert_eq!(tracker.check_thresholds("gamma"), None);
        assert!(matches!(
            events.drain().as_slice(),
            [DomainEvent::Context(ContextEvent::SeverityEscalated { to: Severity::Warn, .. })]
        ));
        assert_eq!(tracker.snapshot_all().len(), 1);
    }
}
