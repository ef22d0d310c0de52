// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Sunrise: hand an agent's preserved notes back.
//!
//! The resume hint goes to stdout so it can be piped into whatever restarts
//! the agent. `--check` reports without consuming.
//!
//! With nothing preserved, a name the registry does not know fails as
//! `AgentNotFound`; a known one fails as `NoStateToRestore`.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use chorus_core::application::ChorusContext;
use chorus_core::domain::config::ChorusConfig;
use chorus_core::domain::error::ChorusError;

use super::sundown::print_state;
use crate::exit::ExitStatus;

#[derive(Args)]
pub struct SunriseArgs {
    /// Agent to restore
    #[arg(required_unless_present = "check")]
    pub agent: Option<String>,

    /// Report preserved state without consuming it
    #[arg(long)]
    pub check: bool,
}

pub async fn handle_command(args: SunriseArgs, config: ChorusConfig) -> Result<ExitStatus> {
    let ctx = ChorusContext::from_config(config)?;
    match (args.check, args.agent) {
        (true, Some(agent)) => check(&ctx, &agent).await,
        (true, None) => check_all(&ctx).await,
        (false, Some(agent)) => sunrise(&ctx, &agent).await,
        (false, None) => anyhow::bail!("An agent name is required without --check"),
    }
}

async fn sunrise(ctx: &ChorusContext, agent: &str) -> Result<ExitStatus> {
    let sunrise = ctx
        .lifecycle
        .sunrise(agent)
        .await
        .with_context(|| format!("Sunrise failed for '{}'", agent))?;

    if sunrise.is_empty() {
        return Err(nothing_to_restore(ctx, agent).await?.into());
    }

    eprintln!("{}", format!("✓ Restored context for {}", agent).green());
    println!("{}", sunrise.resume_hint);
    Ok(ExitStatus::Success)
}

async fn check(ctx: &ChorusContext, agent: &str) -> Result<ExitStatus> {
    let state = ctx
        .lifecycle
        .peek(agent)
        .await
        .context("Failed to read sundown state")?;
    let fresh_start = ctx
        .lifecycle
        .needs_fresh_start(agent)
        .await
        .context("Failed to read sundown state")?;

    match state {
        Some(state) => {
            println!("{}", format!("✓ Preserved state waiting for {}", agent).green());
            print_state(&state);
            println!("  Fresh start pending: {}", fresh_start);
            Ok(ExitStatus::Success)
        }
        None => {
            if fresh_start {
                println!("  Fresh start pending: true");
            }
            Err(nothing_to_restore(ctx, agent).await?.into())
        }
    }
}

/// The error for an agent with nothing preserved.
async fn nothing_to_restore(ctx: &ChorusContext, agent: &str) -> Result<ChorusError> {
    let registered = ctx
        .registry
        .get(agent)
        .await
        .context("Failed to read registry")?
        .is_some();
    Ok(if registered {
        ChorusError::NoStateToRestore(agent.to_string())
    } else {
        ChorusError::AgentNotFound(agent.to_string())
    })
}

async fn check_all(ctx: &ChorusContext) -> Result<ExitStatus> {
    let pending = ctx
        .lifecycle
        .pending()
        .await
        .context("Failed to read sundown state")?;

    if pending.is_empty() {
        println!("{}", "No preserved state waiting for sunrise".yellow());
        return Ok(ExitStatus::NoStateToRestore);
    }

    println!("{} agents have preserved state:", pending.len());
    for state in &pending {
        println!("  {} ({})", state.agent_name.bold(), state.reason);
    }
    Ok(ExitStatus::Success)
}
