// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Broadcast Orchestrator
//!
//! Fans a message out to every resolved target and returns the replies as
//! one arrival-ordered stream.
//!
//! Each target gets its own task in a [`JoinSet`]. Tasks wait for a
//! semaphore permit, call the dispatcher under the per-target timeout and
//! push attributed events into a shared mpsc channel. The returned
//! [`BroadcastStream`] reads that channel, applies the job timeout and
//! keeps the [`BroadcastJob`] status current.
//!
//! Dropping the stream cancels the job token and aborts the task set.

use chorus_core::domain::error::{ChorusError, ErrorKind};
use chorus_core::domain::message::{AgentResponse, Message, ResponseFragment, HEADER_BROADCAST_ID};
use chorus_core::domain::transport::TransportError;
use futures::stream::{BoxStream, Stream, StreamExt};
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::application::Dispatcher;
use crate::domain::broadcast::{
    BroadcastEvent, BroadcastEventKind, BroadcastId, BroadcastJob, BroadcastOptions,
    DeliveryStatus, TeamChatReport,
};

/// Events buffered per target before senders wait on the reader.
const EVENTS_PER_TARGET: usize = 16;

pub struct BroadcastOrchestrator {
    dispatcher: Arc<dyn Dispatcher>,
    defaults: BroadcastOptions,
}

impl BroadcastOrchestrator {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, defaults: BroadcastOptions) -> Self {
        Self {
            dispatcher,
            defaults,
        }
    }

    pub fn defaults(&self) -> &BroadcastOptions {
        &self.defaults
    }

    /// Broadcast with the default options and wait for every target,
    /// including any automatic sundown a reply triggered.
    pub async fn team_chat(&self, message: &Message) -> Result<TeamChatReport, ChorusError> {
        let stream = self.broadcast(message, self.defaults.clone()).await?;
        let report = stream.collect().await;
        self.settle().await;
        Ok(report)
    }

    /// Waits for work deliveries left running after their replies.
    pub async fn settle(&self) {
        self.dispatcher.settle().await
    }

    /// Starts a broadcast. Fails only if the targets cannot be resolved;
    /// everything after that is reported per target on the stream.
    pub async fn broadcast(
        &self,
        message: &Message,
        options: BroadcastOptions,
    ) -> Result<BroadcastStream, ChorusError> {
        let targets = self.dispatcher.targets(&options.exclude).await?;
        let job = BroadcastJob::new(targets.clone());
        let broadcast_id = job.id;
        info!(
            broadcast_id = %broadcast_id,
            targets = targets.len(),
            excluded = options.exclude.len(),
            streaming = options.streaming,
            "Broadcast started"
        );

        let cancel = CancellationToken::new();
        let semaphore = Arc::new(Semaphore::new(options.max_concurrency.max(1)));
        let (events_tx, events_rx) = mpsc::channel(EVENTS_PER_TARGET * targets.len().max(1));

        let mut tasks = JoinSet::new();
        for target in targets {
            let call = TargetCall {
                dispatcher: self.dispatcher.clone(),
                broadcast_id,
                message: message
                    .addressed_to(&target)
                    .with_header(HEADER_BROADCAST_ID, broadcast_id.to_string()),
                target,
                timeout: options.per_target_timeout,
                streaming: options.streaming,
                events: events_tx.clone(),
            };
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = call.run(semaphore) => {}
                }
            });
        }
        drop(events_tx);

        let job = Arc::new(Mutex::new(job));
        let events = fan_in(
            job.clone(),
            events_rx,
            tasks,
            cancel.clone(),
            options.job_timeout,
        );

        Ok(BroadcastStream {
            job,
            events: events.boxed(),
            started: Instant::now(),
            _cancel: cancel.drop_guard(),
        })
    }
}

/// One target's share of a broadcast.
struct TargetCall {
    dispatcher: Arc<dyn Dispatcher>,
    broadcast_id: BroadcastId,
    target: String,
    message: Message,
    timeout: Duration,
    streaming: bool,
    events: mpsc::Sender<BroadcastEvent>,
}

impl TargetCall {
    async fn run(self, semaphore: Arc<Semaphore>) {
        let Ok(_permit) = semaphore.acquire_owned().await else {
            return;
        };
        debug!(broadcast_id = %self.broadcast_id, target = %self.target, "Dispatching");

        let kind = match tokio::time::timeout(self.timeout, self.deliver()).await {
            Ok(Ok(response)) => BroadcastEventKind::Delivered { response },
            Ok(Err(e)) => BroadcastEventKind::Failed {
                kind: e.kind(),
                error: e.to_string(),
            },
            Err(_) => BroadcastEventKind::TimedOut {
                after: self.timeout,
            },
        };
        let event = BroadcastEvent::new(self.broadcast_id, self.target.clone(), kind);
        if self.events.send(event).await.is_err() {
            debug!(target = %self.target, "Broadcast reader gone, dropping result");
        }
    }

    async fn deliver(&self) -> Result<AgentResponse, ChorusError> {
        if !self.streaming {
            return self.dispatcher.send(&self.target, &self.message).await;
        }

        let started = Instant::now();
        let mut fragments = self.dispatcher.stream(&self.target, &self.message).await?;
        let mut content = String::new();
        while let Some(fragment) = fragments.next().await {
            match fragment? {
                ResponseFragment::Chunk { index, content: chunk } => {
                    content.push_str(&chunk);
                    let event = BroadcastEvent::new(
                        self.broadcast_id,
                        self.target.clone(),
                        BroadcastEventKind::Fragment {
                            index,
                            content: chunk,
                        },
                    );
                    if self.events.send(event).await.is_err() {
                        break;
                    }
                }
                ResponseFragment::Done { model, usage } => {
                    return Ok(AgentResponse {
                        agent: self.target.clone(),
                        content,
                        model,
                        usage,
                        elapsed: started.elapsed(),
                    });
                }
            }
        }

        Err(TransportError::Protocol {
            agent: self.target.clone(),
            message: "stream ended before completion".to_string(),
        }
        .into())
    }
}

/// Reads the fan-in channel until the job is terminal.
fn fan_in(
    job: Arc<Mutex<BroadcastJob>>,
    mut events: mpsc::Receiver<BroadcastEvent>,
    mut tasks: JoinSet<()>,
    cancel: CancellationToken,
    job_timeout: Option<Duration>,
) -> impl Stream<Item = BroadcastEvent> + Send + 'static {
    async_stream::stream! {
        let broadcast_id = job.lock().id;
        let deadline = job_timeout.map(|after| (Instant::now() + after, after));

        while !job.lock().is_terminal() {
            let received = match deadline {
                Some((at, after)) => match tokio::time::timeout_at(at, events.recv()).await {
                    Ok(received) => received,
                    Err(_) => {
                        let expired = job.lock().resolve_pending(DeliveryStatus::TimedOut);
                        warn!(broadcast_id = %broadcast_id, targets = expired.len(), "Broadcast job timed out");
                        cancel.cancel();
                        for target in expired {
                            yield BroadcastEvent::new(broadcast_id, target, BroadcastEventKind::TimedOut { after });
                        }
                        break;
                    }
                },
                None => events.recv().await,
            };

            let Some(event) = received else {
                let orphaned = job.lock().resolve_pending(DeliveryStatus::Failed);
                for target in orphaned {
                    warn!(broadcast_id = %broadcast_id, target = %target, "Dispatch task ended without a result");
                    yield BroadcastEvent::new(
                        broadcast_id,
                        target,
                        BroadcastEventKind::Failed {
                            kind: ErrorKind::Other,
                            error: "dispatch task ended without a result".to_string(),
                        },
                    );
                }
                break;
            };

            let accepted = {
                let mut job = job.lock();
                if event.is_terminal() {
                    job.resolve(&event.target, event.kind.status())
                } else {
                    job.status(&event.target) == Some(DeliveryStatus::Pending)
                }
            };
            if !accepted {
                warn!(broadcast_id = %broadcast_id, target = %event.target, "Discarding late broadcast result");
                continue;
            }
            yield event;
        }

        cancel.cancel();
        tasks.abort_all();
        while let Ok(late) = events.try_recv() {
            if late.is_terminal() {
                warn!(broadcast_id = %broadcast_id, target = %late.target, "Discarding late broadcast result");
            }
        }
        info!(broadcast_id = %broadcast_id, "Broadcast finished");
    }
}

/// Arrival-ordered events of one broadcast.
///
/// Ends after every target has had exactly one terminal event. Dropping it
/// stops every outstanding call.
pub struct BroadcastStream {
    job: Arc<Mutex<BroadcastJob>>,
    events: BoxStream<'static, BroadcastEvent>,
    started: Instant,
    _cancel: DropGuard,
}

impl BroadcastStream {
    pub fn id(&self) -> BroadcastId {
        self.job.lock().id
    }

    /// Snapshot of the job, including per-target delivery status.
    pub fn job(&self) -> BroadcastJob {
        self.job.lock().clone()
    }

    /// Drains the stream into a report.
    pub async fn collect(mut self) -> TeamChatReport {
        let (id, targets) = {
            let job = self.job.lock();
            (job.id, job.targets.clone())
        };
        let mut report = TeamChatReport::new(id, targets);
        while let Some(event) = self.events.next().await {
            report.record(event);
        }
        report.elapsed = self.started.elapsed();
        report
    }
}

impl Stream for BroadcastStream {
    type Item = BroadcastEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for BroadcastStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastStream")
            .field("job", &*self.job.lock())
            .finish()
    }
}
