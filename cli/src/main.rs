// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Chorus CLI
//!
//! The `chorus` binary is the operator's view of a Chorus team: the shared
//! agent registry, preserved context and team-wide messages.
//!
//! ## Commands
//!
//! - `chorus sundown <agent> [reason]` / `chorus sundown status` - Preserve context
//! - `chorus sunrise <agent>` / `chorus sunrise --check [agent]` - Restore context
//! - `chorus registry list|show|deregister|reap|wait` - Inspect the registry
//! - `chorus team-chat <message>` - Broadcast to every live agent
//! - `chorus config show|validate|generate` - Configuration management
//!
//! Exit codes are listed in [`chorus_cli::exit`].

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;

use chorus_cli::commands::{
    self, ConfigCommand, RegistryCommand, SundownArgs, SunriseArgs, TeamChatArgs,
};
use chorus_cli::exit::ExitStatus;
use chorus_core::domain::config::{ChorusConfig, LoggingConfig};

/// Chorus - coordinate a team of long-running agents
#[derive(Parser)]
#[command(name = "chorus")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "CHORUS_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error) [default: info]
    #[arg(long, global = true, env = "CHORUS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, global = true, env = "CHORUS_LOG_FORMAT", value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Preserve an agent's context before a reset
    #[command(name = "sundown")]
    Sundown(SundownArgs),

    /// Restore an agent's preserved context
    #[command(name = "sunrise")]
    Sunrise(SunriseArgs),

    /// Inspect and maintain the agent registry
    #[command(name = "registry")]
    Registry {
        #[command(subcommand)]
        command: RegistryCommand,
    },

    /// Send one message to every live agent
    #[command(name = "team-chat")]
    TeamChat(TeamChatArgs),

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn from_config(format: &str) -> Self {
        if format.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

#[tokio::main]
async fn main() {
    // A missing .env is normal
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let status = match run(cli).await {
        Ok(status) => status,
        Err(err) => {
            eprintln!("{} {:#}", "error:".red().bold(), err);
            ExitStatus::from_error(&err)
        }
    };
    std::process::exit(status.code());
}

async fn run(cli: Cli) -> Result<ExitStatus> {
    // Config commands report on the file themselves, so a bad file must not
    // stop them from running.
    let loaded = ChorusConfig::load_or_default(cli.config.clone());
    let logging = loaded
        .as_ref()
        .map(|config| config.spec.observability.logging.clone())
        .unwrap_or_default();
    init_logging(&cli, &logging)?;

    match cli.command {
        Commands::Config { command } => commands::config::handle_command(command, cli.config).await,
        Commands::Sundown(args) => commands::sundown::handle_command(args, loaded?).await,
        Commands::Sunrise(args) => commands::sunrise::handle_command(args, loaded?).await,
        Commands::Registry { command } => {
            commands::registry::handle_command(command, &loaded?).await
        }
        Commands::TeamChat(args) => commands::team_chat::handle_command(args, loaded?).await,
    }
}

/// Initialize tracing subscriber for logging. Flags win over the
/// configuration file; `RUST_LOG` wins over both.
fn init_logging(cli: &Cli, logging: &LoggingConfig) -> Result<()> {
    let level = cli.log_level.as_deref().unwrap_or(&logging.level);
    let format = cli
        .log_format
        .unwrap_or_else(|| LogFormat::from_config(&logging.format));

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.compact().init(),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_sundown_forms() {
        let cli = Cli::try_parse_from(["chorus", "sundown", "alpha", "end", "of", "day"]).unwrap();
        match cli.command {
            Commands::Sundown(args) => {
                assert!(args.command.is_none());
                assert_eq!(args.agent.as_deref(), Some("alpha"));
                assert_eq!(args.reason.join(" "), "end of day");
            }
            _ => panic!("expected sundown"),
        }

        let cli = Cli::try_parse_from(["chorus", "sundown", "status"]).unwrap();
        match cli.command {
            Commands::Sundown(args) => assert!(args.command.is_some()),
            _ => panic!("expected sundown status"),
        }
    }

    #[test]
    fn test_sunrise_requires_agent_unless_checking() {
        assert!(Cli::try_parse_from(["chorus", "sunrise"]).is_err());

        let cli = Cli::try_parse_from(["chorus", "sunrise", "--check"]).unwrap();
        match cli.command {
            Commands::Sunrise(args) => {
                assert!(args.check);
                assert!(args.agent.is_none());
            }
            _ => panic!("expected sunrise"),
        }
    }

    #[test]
    fn test_team_chat_flags() {
        let cli = Cli::try_parse_from([
            "chorus",
            "--log-format",
            "json",
            "team-chat",
            "standup in five",
            "--exclude",
            "beta",
            "--exclude",
            "gamma",
            "--timeout",
            "10",
            "--stream",
        ])
        .unwrap();

        assert_eq!(cli.log_format, Some(LogFormat::Json));
        match cli.command {
            Commands::TeamChat(args) => {
                assert_eq!(args.message, "standup in five");
                assert_eq!(args.exclude, vec!["beta", "gamma"]);
                assert_eq!(args.timeout, Some(10));
                assert!(args.stream);
            }
            _ => panic!("expected team-chat"),
        }
    }

    #[test]
    fn test_log_format_from_config() {
        assert_eq!(LogFormat::from_config("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from_config("text"), LogFormat::Text);
        assert_eq!(LogFormat::from_config("anything"), LogFormat::Text);
    }
}
