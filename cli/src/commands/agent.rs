// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;
use uuid::Uuid;

use automa_core::application::Actor;
use automa_core::domain::agent::{Agent, AgentId, AgentStatus};

use crate::embedded::{build_host, load_config};

#[derive(Subcommand)]
pub enum AgentCommand {
    /// List agents across all owners
    List {
        /// Only agents in this state (stopped, running, error)
        #[arg(long)]
        status: Option<AgentStatus>,
    },

    /// Start an agent's detached container
    Start {
        #[arg(value_name = "AGENT_ID")]
        agent_id: Uuid,
    },

    /// Stop an agent's container
    Stop {
        #[arg(value_name = "AGENT_ID")]
        agent_id: Uuid,
    },

    /// Stop then start an agent
    Restart {
        #[arg(value_name = "AGENT_ID")]
        agent_id: Uuid,
    },
}

pub async fn handle_command(command: AgentCommand, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let host = build_host(&config).await?;
    let agents = &host.agents;

    match command {
        AgentCommand::List { status } => {
            let statuses = match status {
                Some(s) => vec![s],
                None => vec![AgentStatus::Running, AgentStatus::Error, AgentStatus::Stopped],
            };
            let mut found = Vec::new();
            for s in statuses {
                found.extend(host.repositories.agents.find_by_status(s).await?);
            }
            list_agents(&found);
            Ok(())
        }
        AgentCommand::Start { agent_id } => {
            let agent = agents
                .start_agent(AgentId(agent_id), Actor::System)
                .await
                .context("Failed to start agent")?;
            print_transition("started", &agent);
            Ok(())
        }
        AgentCommand::Stop { agent_id } => {
            let agent = agents
                .stop_agent(AgentId(agent_id), Actor::System)
                .await
                .context("Failed to stop agent")?;
            print_transition("stopped", &agent);
            Ok(())
        }
        AgentCommand::Restart { agent_id } => {
            let agent = agents
                .restart_agent(AgentId(agent_id), Actor::System)
                .await
                .context("Failed to restart agent")?;
            print_transition("restarted", &agent);
            Ok(())
        }
    }
}

fn list_agents(agents: &[Agent]) {
    if agents.is_empty() {
        println!("{}", "No agents found".yellow());
        return;
    }

    println!("{} agents found:", agents.len());
    println!("{:<38} {:<24} {:<10} {}", "ID", "NAME", "STATUS", "CONTAINER");
    for agent in agents {
        let status = match agent.status() {
            AgentStatus::Running => agent.status().as_str().green(),
            AgentStatus::Error => agent.status().as_str().red(),
            AgentStatus::Stopped => agent.status().as_str().dimmed(),
        };
        println!(
            "{:<38} {:<24} {:<10} {}",
            agent.id,
            agent.name.bold(),
            status,
            agent.container().map(|h| h.as_str()).unwrap_or("-")
        );
    }
}

fn print_transition(verb: &str, agent: &Agent) {
    println!(
        "{}",
        format!("✓ Agent {} ({}) {}", agent.name, agent.id, verb).green()
    );
    if let Some(handle) = agent.container() {
        println!("  Container: {}", handle);
    }
}
