// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use chorus_core::domain::config::ChorusConfig;

use crate::exit::ExitStatus;

pub const MINIMAL_TEMPLATE: &str = include_str!("../../templates/config-minimal.yaml");
pub const EXAMPLES_TEMPLATE: &str = include_str!("../../templates/config-with-examples.yaml");

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the full effective configuration as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./chorus-config.yaml)
        #[arg(short, long, default_value = "./chorus-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<ExitStatus> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output, examples } => generate(&output, examples),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool, yaml: bool) -> Result<ExitStatus> {
    let config = ChorusConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. CHORUS_CONFIG_PATH: {}",
            std::env::var("CHORUS_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./chorus-config.yaml");
        println!("  4. ~/.chorus/config.yaml");
        println!("  5. /etc/chorus/config.yaml");
        println!();
    }

    if yaml {
        print!("{}", serde_yaml::to_string(&config).context("Failed to render configuration")?);
        return Ok(ExitStatus::Success);
    }

    let spec = &config.spec;
    println!("{} {}", "Current configuration:".bold(), config.metadata.name);
    println!();

    println!("{}", "Registry:".bold());
    println!("  Path: {}", spec.registry.path.display());
    println!("  Port range: {}", spec.registry.port_range);
    println!("  Stale after: {:?}", spec.registry.stale_after);
    println!();

    println!("{}", "Transport:".bold());
    println!("  Connect timeout: {:?}", spec.transport.connect_timeout);
    println!("  Request timeout: {:?}", spec.transport.request_timeout);
    println!("  Managed API: {}", spec.transport.managed_api.endpoint);
    println!();

    println!("{}", "Broadcast:".bold());
    println!("  Per-target timeout: {:?}", spec.broadcast.per_target_timeout);
    match spec.broadcast.job_timeout {
        Some(timeout) => println!("  Job timeout: {:?}", timeout),
        None => println!("  Job timeout: {}", "(none)".dimmed()),
    }
    println!("  Max concurrency: {}", spec.broadcast.max_concurrency);
    println!();

    println!("{}", "Budget:".bold());
    println!("  Default model: {}", spec.budget.default_model);
    let thresholds = &spec.budget.thresholds;
    println!(
        "  Thresholds: warn {:.2}, suggest {:.2}, auto {:.2}, critical {:.2}",
        thresholds.warn, thresholds.suggest_preserve, thresholds.auto_preserve, thresholds.critical
    );
    for model in &spec.budget.models {
        println!("    - {} ({} tokens)", model.name, model.window_size);
    }
    println!();

    println!("{}", "Lifecycle:".bold());
    println!("  State dir: {}", spec.lifecycle.state_dir.display());
    println!("  Summary timeout: {:?}", spec.lifecycle.summary_timeout);
    println!();

    Ok(ExitStatus::Success)
}

fn validate(config_path: Option<PathBuf>) -> Result<ExitStatus> {
    println!("Validating configuration...");

    let config = ChorusConfig::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(ExitStatus::Success)
}

/// Writes a sample configuration to `output`.
pub fn generate(output: &Path, with_examples: bool) -> Result<ExitStatus> {
    let sample = if with_examples {
        EXAMPLES_TEMPLATE
    } else {
        MINIMAL_TEMPLATE
    };

    std::fs::write(output, sample)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(ExitStatus::Success)
}
