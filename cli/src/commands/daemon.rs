// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Foreground scheduler daemon.
//!
//! Startup: load config, connect storage and Docker, reconcile agents, arm
//! jobs. Runs until SIGINT/SIGTERM, then drains and stops running agents.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};

use crate::embedded::{build_host, load_config};

pub async fn run(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let host = build_host(&config).await?;

    if let Err(e) = host.sandbox.health_check().await {
        warn!(error = %e, "Docker is not reachable; executions will fail until it is");
    }

    host.init_scheduler()
        .await
        .context("Failed to initialize scheduler")?;

    println!(
        "{}",
        format!("✓ automa scheduler running ({})", config.metadata.name).green()
    );

    shutdown_signal().await;

    info!("Shutting down scheduler");
    let report = host.shutdown_scheduler().await;
    if report.errors > 0 {
        warn!(
            stopped = report.stopped,
            errors = report.errors,
            "Some agents could not be stopped cleanly"
        );
    }
    info!("Daemon shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
