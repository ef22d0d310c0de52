// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Team chat: one message to every live agent, replies printed as they land.
//!
//! A reply can push an agent into auto-preserve. The round waits for those
//! sundowns before exiting and lists them after the summary.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use chorus_core::application::ChorusContext;
use chorus_core::domain::config::ChorusConfig;
use chorus_core::domain::events::ContextEvent;
use chorus_core::domain::lifecycle::SummarySource;
use chorus_core::domain::message::Message;
use chorus_core::infrastructure::DomainEvent;
use chorus_swarm::application::BroadcastOrchestrator;
use chorus_swarm::domain::broadcast::{BroadcastEvent, BroadcastEventKind, BroadcastOptions, TeamChatReport};

use crate::exit::ExitStatus;

#[derive(Args)]
pub struct TeamChatArgs {
    /// Message sent to every live agent
    pub message: String,

    /// Leave an agent out (repeatable)
    #[arg(long, value_name = "NAME")]
    pub exclude: Vec<String>,

    /// Seconds to wait for each agent (default: spec.broadcast.per_target_timeout)
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Seconds to wait for the whole round
    #[arg(long, value_name = "SECS")]
    pub job_timeout: Option<u64>,

    /// Print replies while they are being generated
    #[arg(long)]
    pub stream: bool,

    /// Print every event as one JSON line
    #[arg(long)]
    pub json: bool,

    /// Sender recorded on the message
    #[arg(long, default_value = "operator")]
    pub from: String,
}

impl TeamChatArgs {
    pub fn options(&self, config: &ChorusConfig) -> BroadcastOptions {
        let mut options = BroadcastOptions::from(&config.spec.broadcast)
            .streaming(self.stream)
            .excluding(self.exclude.iter().cloned());
        if let Some(secs) = self.timeout {
            options = options.with_per_target_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.job_timeout {
            options = options.with_job_timeout(Duration::from_secs(secs));
        }
        options
    }
}

pub async fn handle_command(args: TeamChatArgs, config: ChorusConfig) -> Result<ExitStatus> {
    let options = args.options(&config);
    let ctx = ChorusContext::from_config(config)?;
    let orchestrator = BroadcastOrchestrator::new(Arc::new(ctx.messenger.clone()), options.clone());
    let mut context_events = ctx.event_bus.subscribe();

    let started = Instant::now();
    let message = Message::broadcast(&args.from, &args.message);
    let mut events = orchestrator
        .broadcast(&message, options)
        .await
        .context("Failed to start team chat")?;

    let job = events.job();
    debug!(broadcast_id = %job.id, targets = job.targets.len(), streaming = args.stream, "Team chat started");
    if job.targets.is_empty() {
        if !args.json {
            println!("{}", "No live agents to talk to".yellow());
        }
        return Ok(ExitStatus::Success);
    }
    if !args.json {
        println!(
            "Sending to {} agents: {}",
            job.targets.len(),
            job.targets.join(", ").bold()
        );
        println!();
    }

    let mut report = TeamChatReport::new(job.id, job.targets);
    while let Some(event) = events.next().await {
        if args.json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            render(&event, args.stream);
        }
        report.record(event);
    }
    report.elapsed = started.elapsed();
    drop(events);

    orchestrator.settle().await;
    let sundowns = automatic_sundowns(context_events.drain());

    if args.json {
        for event in &sundowns {
            println!("{}", serde_json::to_string(&DomainEvent::Context(event.clone()))?);
        }
    } else {
        println!();
        println!(
            "{} delivered, {} failed, {} timed out in {:.1}s",
            report.responses.len().to_string().green(),
            report.failures.len().to_string().red(),
            report.timeouts.len().to_string().yellow(),
            report.elapsed.as_secs_f64()
        );
        for event in &sundowns {
            if let ContextEvent::SundownCompleted { agent, source, .. } = event {
                let note = match source {
                    SummarySource::Agent => "agent summary",
                    SummarySource::Fallback => "fallback snapshot",
                };
                println!("{} {} context preserved ({})", "☾".blue(), agent.bold(), note);
            }
        }
    }

    Ok(exit_status(&report))
}

/// Sundowns completed during the round.
pub fn automatic_sundowns(events: Vec<DomainEvent>) -> Vec<ContextEvent> {
    events
        .into_iter()
        .filter_map(|event| match event {
            DomainEvent::Context(event @ ContextEvent::SundownCompleted { .. }) => Some(event),
            _ => None,
        })
        .collect()
}

fn render(event: &BroadcastEvent, streaming: bool) {
    let label = format!("[{}]", event.target);
    match &event.kind {
        BroadcastEventKind::Fragment { content, .. } => println!("{} {}", label.cyan(), content),
        BroadcastEventKind::Delivered { response } => {
            println!(
                "{} {}",
                "✓".green(),
                format!("{} ({:.1}s)", event.target, response.elapsed.as_secs_f64()).bold()
            );
            if !streaming {
                for line in response.content.lines() {
                    println!("  {}", line);
                }
            }
        }
        BroadcastEventKind::TimedOut { after } => {
            println!("{} {} timed out after {:?}", "⏱".yellow(), event.target.bold(), after);
        }
        BroadcastEventKind::Failed { kind, error } => {
            println!("{} {} {}: {}", "✗".red(), event.target.bold(), kind, error);
        }
    }
}

/// A round where nobody answered reports as unreachable.
pub fn exit_status(report: &TeamChatReport) -> ExitStatus {
    if report.targets.is_empty() || !report.responses.is_empty() {
        ExitStatus::Success
    } else {
        ExitStatus::AgentUnreachable
    }
}
