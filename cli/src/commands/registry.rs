// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Registry inspection and maintenance
//!
//! Commands: list, show, deregister, reap, wait

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Subcommand;
use colored::Colorize;
use std::time::Duration;
use tracing::debug;

use chorus_core::application::RegistryClient;
use chorus_core::domain::config::ChorusConfig;
use chorus_core::domain::error::ChorusError;
use chorus_core::domain::registry::RegistryEntry;
use chorus_core::infrastructure::EventBus;

use super::ago;
use crate::exit::ExitStatus;

#[derive(Subcommand)]
pub enum RegistryCommand {
    /// List registered agents
    List {
        /// Hide stale entries
        #[arg(long)]
        live: bool,

        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one agent's entry
    Show {
        /// Agent name
        name: String,
    },

    /// Remove an agent's entry
    Deregister {
        /// Agent name
        name: String,
    },

    /// Remove entries whose agents are gone or silent
    Reap,

    /// Wait until an agent registers
    Wait {
        /// Agent name
        name: String,

        /// Seconds to wait before giving up
        #[arg(long, default_value = "30")]
        timeout: u64,
    },
}

pub async fn handle_command(command: RegistryCommand, config: &ChorusConfig) -> Result<ExitStatus> {
    let registry = RegistryClient::open(&config.spec.registry, EventBus::default()).with_context(|| {
        format!(
            "Failed to open registry at {}",
            config.spec.registry.path.display()
        )
    })?;
    debug!(path = %config.spec.registry.path.display(), "Registry opened");

    match command {
        RegistryCommand::List { live, json } => list(&registry, live, json).await,
        RegistryCommand::Show { name } => show(&registry, &name).await,
        RegistryCommand::Deregister { name } => deregister(&registry, &name).await,
        RegistryCommand::Reap => reap(&registry).await,
        RegistryCommand::Wait { name, timeout } => {
            wait(&registry, &name, Duration::from_secs(timeout)).await
        }
    }
}

async fn list(registry: &RegistryClient, live_only: bool, json: bool) -> Result<ExitStatus> {
    let entries = if live_only {
        registry.list_live().await
    } else {
        registry.list().await
    }
    .context("Failed to read registry")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(ExitStatus::Success);
    }

    if entries.is_empty() {
        println!("{}", "No agents registered".yellow());
        return Ok(ExitStatus::Success);
    }

    println!(
        "{:<24} {:<14} {:<22} {:<18} {:<8} {:<10} {}",
        "NAME".bold(),
        "TRANSPORT".bold(),
        "ADDRESS".bold(),
        "OWNER".bold(),
        "PID".bold(),
        "LAST SEEN".bold(),
        "STATUS".bold()
    );
    println!("{}", "-".repeat(108));

    let now = Utc::now();
    for entry in &entries {
        let status = if registry.is_stale(entry) {
            "stale".yellow()
        } else {
            "live".green()
        };
        println!(
            "{:<24} {:<14} {:<22} {:<18} {:<8} {:<10} {}",
            entry.name,
            entry.transport_kind.to_string(),
            address(entry),
            entry.owner_component,
            entry
                .process_id
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "-".to_string()),
            ago(entry.last_seen, now),
            status
        );
    }

    Ok(ExitStatus::Success)
}

async fn show(registry: &RegistryClient, name: &str) -> Result<ExitStatus> {
    let entry = registry
        .get(name)
        .await
        .context("Failed to read registry")?
        .ok_or_else(|| ChorusError::AgentNotFound(name.to_string()))?;

    let now = Utc::now();
    println!("{}", entry.name.bold());
    println!("  Transport: {}", entry.transport_kind);
    println!("  Address: {}", address(&entry));
    println!("  Owner: {}", entry.owner_component);
    if let Some(pid) = entry.process_id {
        println!("  PID: {}", pid);
    }
    println!("  Registered: {} ({})", entry.registered_at, ago(entry.registered_at, now));
    println!("  Last seen: {} ({})", entry.last_seen, ago(entry.last_seen, now));
    if registry.is_stale(&entry) {
        println!("  Status: {}", "stale".yellow());
    } else {
        println!("  Status: {}", "live".green());
    }
    if !entry.metadata.is_empty() {
        println!("  Metadata:");
        for (key, value) in &entry.metadata {
            println!("    {}: {}", key, value);
        }
    }

    Ok(ExitStatus::Success)
}

async fn deregister(registry: &RegistryClient, name: &str) -> Result<ExitStatus> {
    let removed = registry
        .deregister(name)
        .await
        .with_context(|| format!("Failed to deregister '{}'", name))?;
    if !removed {
        return Err(ChorusError::AgentNotFound(name.to_string()).into());
    }

    println!("{}", format!("✓ Deregistered {}", name).green());
    Ok(ExitStatus::Success)
}

async fn reap(registry: &RegistryClient) -> Result<ExitStatus> {
    let reaped = registry.reap_stale().await.context("Failed to reap registry")?;
    if reaped.is_empty() {
        println!("No stale entries");
    } else {
        for name in &reaped {
            println!("  {} {}", "reaped".yellow(), name);
        }
        println!("{}", format!("✓ Reaped {} stale entries", reaped.len()).green());
    }
    Ok(ExitStatus::Success)
}

async fn wait(registry: &RegistryClient, name: &str, timeout: Duration) -> Result<ExitStatus> {
    println!("Waiting up to {:?} for {}...", timeout, name.bold());
    let entry = registry
        .wait_for(name, timeout)
        .await
        .context("Failed to read registry")?
        .ok_or_else(|| ChorusError::AgentNotFound(name.to_string()))?;

    println!("{}", format!("✓ {} is live at {}", entry.name, address(&entry)).green());
    Ok(ExitStatus::Success)
}

fn address(entry: &RegistryEntry) -> String {
    match entry.port {
        Some(port) => format!("{}:{}", entry.host, port),
        None => entry.host.clone(),
    }
}
