// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent Messenger
//!
//! The one path every outgoing message takes:
//!
//! 1. resolve the agent through discovery
//! 2. sunrise, attaching any resume hint and the fresh-start flag
//! 3. pre-flight the exchange against the context budget
//! 4. call the transport
//! 5. record usage (agent-reported, else estimated)
//! 6. run one automatic sundown on the update that crosses into
//!    auto-preserve
//!
//! A sunrise whose exchange never reaches the agent is requeued, including
//! when the call is cancelled mid-flight. The automatic sundown runs on a
//! tracked task so that a caller's deadline cannot cut it short.

use futures::StreamExt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::application::budget::ContextBudgetTracker;
use crate::application::discovery::{DiscoveryService, ResolvedAgent};
use crate::application::lifecycle::LifecycleManager;
use crate::domain::budget::PendingExchange;
use crate::domain::error::ChorusError;
use crate::domain::lifecycle::{SundownReason, Sunrise};
use crate::domain::message::{AgentResponse, Message, ResponseFragment, TokenUsage, HEADER_DESTINATION};
use crate::domain::transport::{FragmentStream, SendOptions};

#[derive(Clone)]
pub struct AgentMessenger {
    discovery: DiscoveryService,
    budgets: Arc<ContextBudgetTracker>,
    lifecycle: Arc<LifecycleManager>,
    background: TaskTracker,
}

/// Whether a call waits for the automatic sundown it triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    Wait,
    Detach,
}

/// Everything decided before the transport is called.
struct Prepared {
    agent: ResolvedAgent,
    message: Message,
    options: SendOptions,
    sunrise: PendingSunrise,
    estimate: u64,
}

/// A consumed sunrise whose exchange has not been delivered yet. Dropped
/// while still held, it puts the state back on a background task.
struct PendingSunrise {
    agent: String,
    sunrise: Option<Sunrise>,
    lifecycle: Arc<LifecycleManager>,
    background: TaskTracker,
}

impl PendingSunrise {
    fn delivered(&mut self) {
        self.sunrise = None;
    }

    async fn requeue(&mut self) {
        if let Some(sunrise) = &self.sunrise {
            self.lifecycle.requeue(&self.agent, sunrise).await;
        }
        self.sunrise = None;
    }
}

impl Drop for PendingSunrise {
    fn drop(&mut self) {
        let Some(sunrise) = self.sunrise.take() else {
            return;
        };
        if sunrise.restored.is_none() && !sunrise.fresh_start {
            return;
        }

        let agent = std::mem::take(&mut self.agent);
        match Handle::try_current() {
            Ok(handle) => {
                debug!(agent = %agent, "Exchange abandoned, requeueing sunrise");
                let lifecycle = self.lifecycle.clone();
                self.background.spawn_on(
                    async move { lifecycle.requeue(&agent, &sunrise).await },
                    &handle,
                );
            }
            Err(_) => warn!(agent = %agent, "Exchange abandoned outside a runtime, sunrise not requeued"),
        }
    }
}

impl AgentMessenger {
    pub fn new(
        discovery: DiscoveryService,
        budgets: Arc<ContextBudgetTracker>,
        lifecycle: Arc<LifecycleManager>,
    ) -> Self {
        Self {
            discovery,
            budgets,
            lifecycle,
            background: TaskTracker::new(),
        }
    }

    pub fn discovery(&self) -> &DiscoveryService {
        &self.discovery
    }

    pub fn budgets(&self) -> &Arc<ContextBudgetTracker> {
        &self.budgets
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    /// Sends and waits for the reply and for any automatic sundown it
    /// triggers. The sundown runs on its own task, so cancelling this call
    /// does not cancel it.
    pub async fn send(&self, name: &str, message: &Message) -> Result<AgentResponse, ChorusError> {
        self.send_with(name, message, Completion::Wait).await
    }

    /// Like [`send`](Self::send) but returns as soon as the reply is in. An
    /// automatic sundown keeps running in the background; [`settle`](Self::settle)
    /// waits for it.
    pub async fn send_detached(&self, name: &str, message: &Message) -> Result<AgentResponse, ChorusError> {
        self.send_with(name, message, Completion::Detach).await
    }

    /// Like [`send`](Self::send) but yields fragments. Usage is recorded, and
    /// any automatic sundown has finished, before the final `Done` fragment
    /// is yielded.
    pub async fn stream(&self, name: &str, message: &Message) -> Result<FragmentStream, ChorusError> {
        self.stream_with(name, message, Completion::Wait).await
    }

    /// Streaming counterpart of [`send_detached`](Self::send_detached).
    pub async fn stream_detached(&self, name: &str, message: &Message) -> Result<FragmentStream, ChorusError> {
        self.stream_with(name, message, Completion::Detach).await
    }

    /// Waits for background work started by earlier calls: automatic
    /// sundowns and requeued sunrises.
    pub async fn settle(&self) {
        self.background.close();
        self.background.wait().await;
        self.background.reopen();
    }

    async fn send_with(
        &self,
        name: &str,
        message: &Message,
        completion: Completion,
    ) -> Result<AgentResponse, ChorusError> {
        let mut prepared = self.prepare(name, message).await?;
        let result = prepared
            .agent
            .transport
            .send(&prepared.agent.entry, &prepared.message, &prepared.options)
            .await;

        match result {
            Ok(response) => {
                let sundown = self.complete(&mut prepared, response.usage, &response.content);
                if completion == Completion::Wait {
                    await_sundown(name, sundown).await;
                }
                Ok(response)
            }
            Err(e) => {
                prepared.sunrise.requeue().await;
                Err(e.into())
            }
        }
    }

    async fn stream_with(
        &self,
        name: &str,
        message: &Message,
        completion: Completion,
    ) -> Result<FragmentStream, ChorusError> {
        let mut prepared = self.prepare(name, message).await?;
        let mut fragments = match prepared
            .agent
            .transport
            .stream(&prepared.agent.entry, &prepared.message, &prepared.options)
            .await
        {
            Ok(fragments) => fragments,
            Err(e) => {
                prepared.sunrise.requeue().await;
                return Err(e.into());
            }
        };

        let messenger = self.clone();
        let stream = async_stream::stream! {
            let mut content = String::new();
            while let Some(item) = fragments.next().await {
                let finished = match &item {
                    Ok(ResponseFragment::Chunk { content: chunk, .. }) => {
                        content.push_str(chunk);
                        false
                    }
                    Ok(ResponseFragment::Done { usage, .. }) => {
                        let sundown = messenger.complete(&mut prepared, *usage, &content);
                        if completion == Completion::Wait {
                            await_sundown(prepared.agent.name(), sundown).await;
                        }
                        true
                    }
                    Err(_) => {
                        prepared.sunrise.requeue().await;
                        true
                    }
                };
                yield item;
                if finished {
                    break;
                }
            }
        };
        Ok(stream.boxed())
    }

    async fn prepare(&self, name: &str, message: &Message) -> Result<Prepared, ChorusError> {
        let agent = self.discovery.resolve(name).await?;
        self.budgets.ensure(name, agent.entry.model());

        let sunrise = self.lifecycle.sunrise(name).await?;
        let mut exchange = PendingExchange::new(message.body.clone());
        if !sunrise.resume_hint.is_empty() {
            exchange = exchange.with_leading_turn(sunrise.resume_hint.clone());
        }
        let options = SendOptions {
            fresh_start: sunrise.fresh_start,
            resume_hint: (!sunrise.resume_hint.is_empty()).then(|| sunrise.resume_hint.clone()),
        };
        let mut sunrise = PendingSunrise {
            agent: name.to_string(),
            sunrise: Some(sunrise),
            lifecycle: self.lifecycle.clone(),
            background: self.background.clone(),
        };

        let estimate = match self.budgets.preflight(name, &exchange) {
            Ok(estimate) => estimate,
            Err(e) => {
                sunrise.requeue().await;
                return Err(e.into());
            }
        };

        let message = if message.header(HEADER_DESTINATION) == Some(name) {
            message.clone()
        } else {
            message.addressed_to(name)
        };
        debug!(agent = name, estimate, fresh_start = options.fresh_start, "Exchange prepared");

        Ok(Prepared {
            agent,
            message,
            options,
            sunrise,
            estimate,
        })
    }

    /// Records usage for a delivered exchange. If this exchange crossed into
    /// auto-preserve, starts the automatic sundown on a tracked task and
    /// returns its handle.
    ///
    /// Nothing here awaits, so a caller cancelled after the reply arrived
    /// cannot record the crossing without also starting the sundown.
    fn complete(&self, prepared: &mut Prepared, usage: Option<TokenUsage>, reply: &str) -> Option<JoinHandle<()>> {
        prepared.sunrise.delivered();
        let name = prepared.agent.name();
        let tokens = match usage {
            Some(usage) => usage.total(),
            None => prepared.estimate + self.budgets.estimate(name, &PendingExchange::new(reply)),
        };

        let update = self.budgets.record_usage(name, tokens);
        if !update.crossed_preserve() {
            return None;
        }

        info!(agent = name, severity = %update.current, usage = update.usage, "Running automatic sundown");
        let lifecycle = self.lifecycle.clone();
        let agent = name.to_string();
        let reason = SundownReason::Threshold(update.current);
        Some(self.background.spawn(async move {
            match lifecycle.sundown(&agent, reason).await {
                Ok(outcome) if outcome.is_degraded() => {
                    warn!(agent = %agent, "Automatic sundown stored a fallback snapshot")
                }
                Ok(_) => {}
                Err(e) => warn!(agent = %agent, error = %e, "Automatic sundown failed"),
            }
        }))
    }
}

async fn await_sundown(agent: &str, sundown: Option<JoinHandle<()>>) {
    if let Some(handle) = sundown {
        if let Err(e) = handle.await {
            warn!(agent, error = %e, "Automatic sundown task did not finish");
        }
    }
}
