// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Job inspection and manual runs
//!
//! Commands: list, run, history

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;
use uuid::Uuid;

use automa_core::application::Actor;
use automa_core::domain::agent::UserId;
use automa_core::domain::execution::{Execution, ExecutionStatus};
use automa_core::domain::job::{Job, JobId};

use crate::embedded::{build_host, load_config};

#[derive(Subcommand)]
pub enum JobCommand {
    /// List jobs (active jobs of every owner unless --owner is given)
    List {
        /// Only jobs owned by this user, active or not
        #[arg(long, value_name = "USER_ID")]
        owner: Option<Uuid>,
    },

    /// Run a job now and wait for the result
    Run {
        #[arg(value_name = "JOB_ID")]
        job_id: Uuid,
    },

    /// Show recent executions of a job
    History {
        #[arg(value_name = "JOB_ID")]
        job_id: Uuid,

        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

pub async fn handle_command(command: JobCommand, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let host = build_host(&config).await?;

    match command {
        JobCommand::List { owner } => {
            let jobs = match owner {
                Some(owner) => host.repositories.jobs.list_by_owner(UserId(owner)).await?,
                None => host.repositories.jobs.find_active().await?,
            };
            list_jobs(&jobs);
            Ok(())
        }
        JobCommand::Run { job_id } => {
            println!("Running job {}...", job_id);
            let execution = host
                .jobs
                .execute_job_now(JobId(job_id), Actor::System)
                .await
                .context("Failed to run job")?;
            print_execution(&execution, true);
            Ok(())
        }
        JobCommand::History { job_id, limit } => {
            let executions = host
                .repositories
                .executions
                .find_by_job(JobId(job_id), limit)
                .await?;
            if executions.is_empty() {
                println!("{}", "No executions found".yellow());
            }
            for execution in &executions {
                print_execution(execution, false);
            }
            Ok(())
        }
    }
}

fn list_jobs(jobs: &[Job]) {
    if jobs.is_empty() {
        println!("{}", "No jobs found".yellow());
        return;
    }

    println!("{} jobs found:", jobs.len());
    println!(
        "{:<38} {:<24} {:<10} {:<8} {}",
        "ID", "NAME", "SCHEDULE", "ACTIVE", "NEXT RUN"
    );
    for job in jobs {
        println!(
            "{:<38} {:<24} {:<10} {:<8} {}",
            job.id,
            job.name.bold(),
            job.schedule.kind().as_str(),
            if job.is_active { "yes" } else { "no" },
            job.next_run
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string())
        );
    }
}

fn print_execution(execution: &Execution, with_output: bool) {
    let status = match execution.status() {
        ExecutionStatus::Success => execution.status().as_str().green(),
        ExecutionStatus::Running => execution.status().as_str().yellow(),
        _ => execution.status().as_str().red(),
    };
    println!(
        "{}  {}  {}  exit={}",
        execution.id,
        execution.started_at.to_rfc3339(),
        status,
        execution
            .exit_code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    if with_output {
        if let Some(output) = execution.output() {
            println!("{}", output);
        }
        if let Some(error) = execution.error() {
            if execution.status() != ExecutionStatus::Success {
                eprintln!("{}", error.red());
            }
        }
    }
}
