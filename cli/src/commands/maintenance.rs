// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Operator maintenance commands
//!
//! Commands: reconcile, cleanup-orphans, emergency-stop

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

use crate::embedded::{build_host, load_config};

#[derive(Subcommand)]
pub enum MaintenanceCommand {
    /// Re-check agents recorded as running against Docker
    Reconcile,

    /// Stop managed containers that no running agent owns
    #[command(name = "cleanup-orphans")]
    CleanupOrphans,

    /// Stop every managed container and mark all agents stopped
    #[command(name = "emergency-stop")]
    EmergencyStop {
        /// Skip the confirmation guard
        #[arg(long)]
        yes: bool,
    },
}

pub async fn handle_command(command: MaintenanceCommand, config_path: Option<PathBuf>) -> Result<()> {
    if let MaintenanceCommand::EmergencyStop { yes: false } = command {
        println!(
            "{}",
            "Emergency stop kills every automa container. Re-run with --yes to proceed.".yellow()
        );
        return Ok(());
    }

    let config = load_config(config_path)?;
    let host = build_host(&config).await?;

    match command {
        MaintenanceCommand::Reconcile => {
            let report = host
                .recovery
                .reconcile_on_startup()
                .await
                .context("Reconciliation failed")?;
            print_report("Reconciliation", &report)
        }
        MaintenanceCommand::CleanupOrphans => {
            let report = host.recovery.cleanup_orphans().await;
            print_report("Orphan cleanup", &report)
        }
        MaintenanceCommand::EmergencyStop { .. } => {
            let report = host.recovery.emergency_stop().await;
            if report.container_errors > 0 {
                println!(
                    "{}",
                    format!("⚠ {} containers could not be stopped", report.container_errors).red()
                );
            }
            print_report("Emergency stop", &report)
        }
    }
}

fn print_report<T: Serialize>(title: &str, report: &T) -> Result<()> {
    println!("{}", format!("✓ {} complete", title).green());
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}
