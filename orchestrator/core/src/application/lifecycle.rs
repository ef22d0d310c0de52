// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Lifecycle Manager
//!
//! Sundown asks the agent to write its own continuation notes and stores
//! them; sunrise hands them back as a resume hint on the next interaction.
//!
//! Sundown never fails because the agent did: if the summary cannot be
//! obtained (agent unreachable, timed out, erroring or silent) a fallback
//! snapshot is stored and the failure is reported in the outcome. A name the
//! registry does not know is rejected before anything is stored.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::budget::ContextBudgetTracker;
use crate::application::discovery::{DiscoveryService, ResolvedAgent};
use crate::domain::config::LifecycleConfig;
use crate::domain::error::ChorusError;
use crate::domain::events::ContextEvent;
use crate::domain::lifecycle::{
    summary_request, LifecycleError, SundownOutcome, SundownReason, SundownState, Sunrise,
};
use crate::domain::message::{Message, HEADER_PURPOSE};
use crate::domain::repository::SundownRepository;
use crate::domain::transport::{SendOptions, TransportError};
use crate::infrastructure::event_bus::EventBus;

const LIFECYCLE_SOURCE: &str = "chorus-lifecycle";

pub struct LifecycleManager {
    discovery: DiscoveryService,
    repository: Arc<dyn SundownRepository>,
    budgets: Arc<ContextBudgetTracker>,
    config: LifecycleConfig,
    event_bus: EventBus,
}

impl LifecycleManager {
    pub fn new(
        discovery: DiscoveryService,
        repository: Arc<dyn SundownRepository>,
        budgets: Arc<ContextBudgetTracker>,
        config: LifecycleConfig,
        event_bus: EventBus,
    ) -> Self {
        Self {
            discovery,
            repository,
            budgets,
            config,
            event_bus,
        }
    }

    pub async fn sundown(
        &self,
        agent: &str,
        reason: SundownReason,
    ) -> Result<SundownOutcome, LifecycleError> {
        let resolved = match self.discovery.resolve(agent).await {
            Ok(resolved) => Ok(resolved),
            Err(ChorusError::AgentNotFound(name)) => return Err(LifecycleError::AgentNotFound(name)),
            Err(other) => Err(LifecycleError::AgentUnreachable {
                agent: agent.to_string(),
                reason: other.to_string(),
            }),
        };

        info!(agent, reason = %reason, "Sundown started");
        let usage = self
            .budgets
            .snapshot(agent)
            .map(|budget| budget.current_usage)
            .unwrap_or(0);

        let summary = match resolved {
            Ok(resolved) => self.request_summary(&resolved, &reason).await,
            Err(e) => Err(e),
        };
        let (state, summary_error) = match summary {
            Ok(summary) => (SundownState::authored(agent, reason, summary, usage), None),
            Err(e) => {
                warn!(agent, error = %e, "Agent summary unavailable, storing fallback snapshot");
                (SundownState::fallback(agent, reason, usage), Some(e))
            }
        };

        self.repository.save(&state).await?;
        self.repository.set_fresh_start(agent, true).await?;

        info!(agent, source = ?state.source, usage, "Sundown completed");
        self.event_bus.publish_context_event(ContextEvent::SundownCompleted {
            agent: agent.to_string(),
            reason: state.reason.clone(),
            source: state.source,
            completed_at: Utc::now(),
        });
        Ok(SundownOutcome {
            state,
            summary_error,
        })
    }

    async fn request_summary(&self, resolved: &ResolvedAgent, reason: &SundownReason) -> Result<String, LifecycleError> {
        let agent = resolved.name();
        let message = Message::to_agent(LIFECYCLE_SOURCE, agent, summary_request(reason))
            .addressed_to(agent)
            .with_header(HEADER_PURPOSE, "sundown");
        let sent = tokio::time::timeout(
            self.config.summary_timeout,
            resolved
                .transport
                .send(&resolved.entry, &message, &SendOptions::default()),
        )
        .await;

        let response = match sent {
            Err(_) => {
                return Err(LifecycleError::AgentUnreachable {
                    agent: agent.to_string(),
                    reason: format!("no summary within {:?}", self.config.summary_timeout),
                })
            }
            Ok(Err(e @ (TransportError::Unreachable { .. } | TransportError::Timeout { .. }))) => {
                return Err(LifecycleError::AgentUnreachable {
                    agent: agent.to_string(),
                    reason: e.to_string(),
                })
            }
            Ok(Err(e)) => {
                return Err(LifecycleError::SummaryFailed {
                    agent: agent.to_string(),
                    reason: e.to_string(),
                })
            }
            Ok(Ok(response)) => response,
        };

        if response.content.trim().is_empty() {
            return Err(LifecycleError::SummaryFailed {
                agent: agent.to_string(),
                reason: "empty summary".to_string(),
            });
        }
        Ok(response.content)
    }

    /// Consumes the latest state, clears the fresh-start flag and resets the
    /// budget. With nothing preserved this is a no-op returning an empty
    /// [`Sunrise`].
    pub async fn sunrise(&self, agent: &str) -> Result<Sunrise, LifecycleError> {
        let restored = self.repository.consume(agent).await?;
        let fresh_start = self.repository.needs_fresh_start(agent).await?;
        if fresh_start {
            self.repository.set_fresh_start(agent, false).await?;
        }

        if restored.is_none() && !fresh_start {
            debug!(agent, "Nothing to restore");
            return Ok(Sunrise::default());
        }

        self.budgets.reset(agent);
        info!(agent, restored = restored.is_some(), fresh_start, "Sunrise completed");
        self.event_bus.publish_context_event(ContextEvent::SunriseCompleted {
            agent: agent.to_string(),
            restored: restored.is_some(),
            completed_at: Utc::now(),
        });

        Ok(Sunrise {
            resume_hint: restored
                .as_ref()
                .map(|state| state.resume_hint.clone())
                .unwrap_or_default(),
            restored,
            fresh_start,
        })
    }

    /// Puts a sunrise back when the exchange it was meant for never reached
    /// the agent.
    pub async fn requeue(&self, agent: &str, sunrise: &Sunrise) {
        if let Some(state) = &sunrise.restored {
            if let Err(e) = self.repository.save(state).await {
                warn!(agent, error = %e, "Failed to requeue sundown state");
            }
        }
        if sunrise.fresh_start {
            if let Err(e) = self.repository.set_fresh_start(agent, true).await {
                warn!(agent, error = %e, "Failed to restore fresh-start flag");
            }
        }
        debug!(agent, "Sunrise requeued");
    }

    pub async fn peek(&self, agent: &str) -> Result<Option<SundownState>, LifecycleError> {
        Ok(self.repository.find_latest(agent).await?)
    }

    pub async fn pending(&self) -> Result<Vec<SundownState>, LifecycleError> {
        Ok(self.repository.list_pending().await?)
    }

    pub async fn needs_fresh_start(&self, agent: &str) -> Result<bool, LifecycleError> {
        Ok(self.repository.needs_fresh_start(agent).await?)
    }

    pub fn budgets(&self) -> &Arc<ContextBudgetTracker> {
        &self.budgets
    }
}
