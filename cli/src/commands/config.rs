// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use automa_core::domain::node_config::NodeConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./automa-config.yaml)
        #[arg(short, long, default_value = "./automa-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output, examples } => generate(output, examples),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = NodeConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. AUTOMA_CONFIG_PATH: {}",
            std::env::var("AUTOMA_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./automa-config.yaml");
        println!("  4. ~/.automa/config.yaml");
        println!("  5. /etc/automa/config.yaml");
        println!();
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!("  Node: {}", config.metadata.name);
    println!();

    println!("{}", "Sandbox:".bold());
    println!("  Image: {}", spec.sandbox.image);
    println!(
        "  Limits: memory {} / cpus {} (cpuset {})",
        spec.sandbox.memory_limit, spec.sandbox.cpu_limit, spec.sandbox.cpuset_cpus
    );
    println!("  Timeout: {}s", spec.sandbox.timeout_seconds);
    println!(
        "  Docker: {}",
        spec.sandbox.docker_socket.as_deref().unwrap_or("(local defaults)")
    );
    println!();

    println!("{}", "Scheduler:".bold());
    println!("  Max instances per job: {}", spec.scheduler.max_instances);
    println!("  Misfire grace: {}s", spec.scheduler.misfire_grace_seconds);
    println!(
        "  Default delay for 'once' jobs: {}s",
        spec.scheduler.once_default_delay_seconds
    );
    println!();

    println!("{}", "Storage:".bold());
    match &spec.database.url {
        Some(_) => println!("  PostgreSQL (url set)"),
        None => println!("  In-memory {}", "(state is lost on restart)".dimmed()),
    }

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = NodeConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    if with_examples {
        std::fs::write(&output, include_str!("../../templates/config-with-examples.yaml"))
            .with_context(|| format!("Failed to write config to {:?}", output))?;
    } else {
        NodeConfigManifest::default()
            .to_yaml_file(&output)
            .with_context(|| format!("Failed to write config to {:?}", output))?;
    }

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_template_is_valid() {
        let config =
            NodeConfigManifest::from_yaml_str(include_str!("../../templates/config-with-examples.yaml"))
                .unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn test_generate_minimal_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("automa-config.yaml");
        generate(path.clone(), false).unwrap();
        let config = NodeConfigManifest::from_yaml_file(&path).unwrap();
        config.validate().unwrap();
        assert_eq!(config.spec.scheduler.max_instances, 3);
    }
}
