// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # automa CLI
//!
//! The `automa` binary hosts the scheduling core.
//!
//! ## Commands
//!
//! - `automa daemon` - Run the scheduler in the foreground until SIGINT/SIGTERM
//! - `automa job list|run|history` - Inspect jobs and run them on demand
//! - `automa agent list|start|stop|restart` - Agent container lifecycle
//! - `automa maintenance reconcile|cleanup-orphans|emergency-stop` - Operator recovery
//! - `automa config show|validate|generate` - Configuration management
//!
//! One-shot commands build the services in-process against the configured
//! storage and Docker daemon.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use automa_core::domain::node_config::NodeConfigManifest;
use automa_orchestrator::commands::{
    self, AgentCommand, ConfigCommand, JobCommand, MaintenanceCommand,
};
use automa_orchestrator::embedded;

/// automa - scheduled and long-lived sandboxed script execution
#[derive(Parser)]
#[command(name = "automa")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "AUTOMA_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error) [default: observability.logging.level]
    #[arg(long, global = true, env = "AUTOMA_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (text, json) [default: observability.logging.format]
    #[arg(long, global = true, env = "AUTOMA_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler daemon in the foreground
    #[command(name = "daemon")]
    Daemon,

    /// Job operations
    #[command(name = "job")]
    Job {
        #[command(subcommand)]
        command: JobCommand,
    },

    /// Agent management
    #[command(name = "agent")]
    Agent {
        #[command(subcommand)]
        command: AgentCommand,
    },

    /// Recovery and cleanup
    #[command(name = "maintenance")]
    Maintenance {
        #[command(subcommand)]
        command: MaintenanceCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Missing .env is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Peek at the config for its logging section; the command loads it
    // again once the subscriber is up, reporting any error there.
    let file_logging = NodeConfigManifest::load_or_default(cli.config.clone())
        .ok()
        .map(|config| config.spec.observability.logging);
    let (level, format) = embedded::resolve_logging(
        cli.log_level.as_deref(),
        cli.log_format.as_deref(),
        file_logging.as_ref(),
    );
    init_logging(&level, &format)?;

    match cli.command {
        Some(Commands::Daemon) => commands::daemon::run(cli.config).await,
        Some(Commands::Job { command }) => commands::job::handle_command(command, cli.config).await,
        Some(Commands::Agent { command }) => {
            commands::agent::handle_command(command, cli.config).await
        }
        Some(Commands::Maintenance { command }) => {
            commands::maintenance::handle_command(command, cli.config).await
        }
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    if format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .init();
    }

    Ok(())
}
