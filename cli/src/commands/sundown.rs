// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Sundown: ask an agent to write its continuation notes and store them.
//!
//! `chorus sundown <agent> [reason]` preserves; `chorus sundown status` lists
//! states still waiting for a sunrise.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Subcommand};
use colored::Colorize;

use chorus_core::application::ChorusContext;
use chorus_core::domain::config::ChorusConfig;
use chorus_core::domain::lifecycle::{SummarySource, SundownReason, SundownState};

use super::ago;
use crate::exit::ExitStatus;

#[derive(Args)]
#[command(args_conflicts_with_subcommands = true, arg_required_else_help = true)]
pub struct SundownArgs {
    #[command(subcommand)]
    pub command: Option<SundownCommand>,

    /// Agent whose context should be preserved
    pub agent: Option<String>,

    /// Why the context is being reset
    #[arg(trailing_var_arg = true)]
    pub reason: Vec<String>,
}

#[derive(Subcommand)]
pub enum SundownCommand {
    /// List preserved states waiting for a sunrise
    Status {
        /// Print states as JSON
        #[arg(long)]
        json: bool,
    },
}

pub async fn handle_command(args: SundownArgs, config: ChorusConfig) -> Result<ExitStatus> {
    let ctx = ChorusContext::from_config(config)?;
    match (args.command, args.agent) {
        (Some(SundownCommand::Status { json }), _) => status(&ctx, json).await,
        (None, Some(agent)) => sundown(&ctx, &agent, args.reason.join(" ")).await,
        (None, None) => anyhow::bail!("An agent name or `status` is required"),
    }
}

async fn sundown(ctx: &ChorusContext, agent: &str, reason: String) -> Result<ExitStatus> {
    println!("Preserving context for {}...", agent.bold());
    let outcome = ctx
        .lifecycle
        .sundown(agent, SundownReason::Manual(reason))
        .await
        .with_context(|| format!("Sundown failed for '{}'", agent))?;

    if let Some(e) = &outcome.summary_error {
        println!("{}", format!("! Agent summary unavailable: {}", e).yellow());
        println!("{}", "  Stored a fallback snapshot instead".yellow());
    }
    println!("{}", format!("✓ Context preserved for {}", agent).green());
    print_state(&outcome.state);

    Ok(ExitStatus::from_sundown(&outcome))
}

async fn status(ctx: &ChorusContext, json: bool) -> Result<ExitStatus> {
    let pending = ctx
        .lifecycle
        .pending()
        .await
        .context("Failed to read sundown state")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&pending)?);
        return Ok(ExitStatus::Success);
    }

    if pending.is_empty() {
        println!("{}", "No preserved state waiting for sunrise".yellow());
        return Ok(ExitStatus::Success);
    }

    println!(
        "{:<24} {:<12} {:<10} {:<10} {}",
        "AGENT".bold(),
        "CAPTURED".bold(),
        "SOURCE".bold(),
        "USAGE".bold(),
        "REASON".bold()
    );
    println!("{}", "-".repeat(80));

    let now = Utc::now();
    for state in &pending {
        println!(
            "{:<24} {:<12} {:<10} {:<10} {}",
            state.agent_name,
            ago(state.captured_at, now),
            source_label(state.source),
            state.usage_at_capture,
            state.reason
        );
    }

    Ok(ExitStatus::Success)
}

pub(crate) fn print_state(state: &SundownState) {
    println!("  Agent: {}", state.agent_name);
    println!("  Captured: {}", state.captured_at);
    println!("  Reason: {}", state.reason);
    println!("  Source: {}", source_label(state.source));
    println!("  Usage at capture: {} tokens", state.usage_at_capture);
}

fn source_label(source: SummarySource) -> &'static str {
    match source {
        SummarySource::Agent => "agent",
        SummarySource::Fallback => "fallback",
    }
}
