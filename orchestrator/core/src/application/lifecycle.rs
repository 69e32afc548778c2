// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Lifecycle
//!
//! Start, stop and restart of long-lived agent containers, plus the agent
//! CRUD that sits next to it. Transitions for one agent are serialized by a
//! per-agent async lock so concurrent starts launch a single container.
//!
//! Failure policy:
//!
//! - start: sandbox failure marks the agent `error`, records the reason and is
//!   returned to the caller.
//! - stop: sandbox failure is logged and the agent is marked `stopped`
//!   anyway; an agent must never be stuck in `running` because its container
//!   vanished.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::application::sandbox::{SandboxError, SandboxRunner};
use crate::application::scheduler::JobScheduler;
use crate::domain::agent::{Agent, AgentId, AgentStatus, ScriptRef, UserId};
use crate::domain::audit::{AuditEntry, AuditSink, ResourceType};
use crate::domain::repository::{AgentRepository, JobRepository, RepositoryError};

/// Who is asking. System callers (recovery, scheduler) bypass owner checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    User(UserId),
    System,
}

impl Actor {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Actor::User(id) => Some(*id),
            Actor::System => None,
        }
    }

    pub fn can_access(&self, owner: UserId) -> bool {
        match self {
            Actor::User(id) => *id == owner,
            Actor::System => true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Agent {0} not found")]
    NotFound(AgentId),

    #[error("Agent {0} has no script bound")]
    NoScript(AgentId),

    #[error("Invalid agent: {0}")]
    Validation(String),

    #[error("Sandbox failure: {0}")]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewAgent {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub script: Option<ScriptRef>,
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
}

#[async_trait]
pub trait AgentLifecycleService: Send + Sync {
    async fn create_agent(&self, draft: NewAgent, owner: UserId) -> Result<Agent, LifecycleError>;

    async fn get_agent(&self, id: AgentId, actor: Actor) -> Result<Agent, LifecycleError>;

    async fn list_agents(
        &self,
        owner: UserId,
        status: Option<AgentStatus>,
    ) -> Result<Vec<Agent>, LifecycleError>;

    async fn start_agent(&self, id: AgentId, actor: Actor) -> Result<Agent, LifecycleError>;

    async fn stop_agent(&self, id: AgentId, actor: Actor) -> Result<Agent, LifecycleError>;

    async fn restart_agent(&self, id: AgentId, actor: Actor) -> Result<Agent, LifecycleError>;

    /// Stop if running, unschedule and soft-delete its jobs, soft-delete the
    /// agent.
    async fn delete_agent(&self, id: AgentId, actor: Actor) -> Result<(), LifecycleError>;
}

pub struct StandardAgentLifecycleService {
    agents: Arc<dyn AgentRepository>,
    jobs: Arc<dyn JobRepository>,
    sandbox: Arc<SandboxRunner>,
    scheduler: Arc<JobScheduler>,
    audit: Arc<dyn AuditSink>,
    stop_timeout: Duration,
    locks: DashMap<AgentId, Arc<Mutex<()>>>,
}

impl StandardAgentLifecycleService {
    pub fn new(
        agents: Arc<dyn AgentRepository>,
        jobs: Arc<dyn JobRepository>,
        sandbox: Arc<SandboxRunner>,
        scheduler: Arc<JobScheduler>,
        audit: Arc<dyn AuditSink>,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            agents,
            jobs,
            sandbox,
            scheduler,
            audit,
            stop_timeout,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, id: AgentId) -> Arc<Mutex<()>> {
        self.locks.entry(id).or_default().clone()
    }

    async fn load(&self, id: AgentId, actor: Actor) -> Result<Agent, LifecycleError> {
        self.agents
            .find_by_id(id)
            .await?
            .filter(|a| !a.is_deleted() && actor.can_access(a.owner))
            .ok_or(LifecycleError::NotFound(id))
    }

    fn audit(&self, actor: Actor, action: &str, id: AgentId, details: serde_json::Value) {
        metrics::counter!("automa_agent_transitions_total", "action" => action.to_string())
            .increment(1);
        self.audit.record(AuditEntry::new(
            actor.user_id(),
            action,
            ResourceType::Agent,
            id,
            details,
        ));
    }

    async fn start_locked(&self, id: AgentId, actor: Actor) -> Result<Agent, LifecycleError> {
        let mut agent = self.load(id, actor).await?;
        if agent.is_running() {
            return Ok(agent);
        }
        let script = agent.script.clone().ok_or(LifecycleError::NoScript(id))?;

        match self
            .sandbox
            .start_detached(&script, id, agent.env_vars())
            .await
        {
            Ok(handle) => {
                agent.mark_running(handle.clone());
                self.agents.save(&agent).await?;
                info!(agent_id = %id, container = %handle, "Agent started");
                self.audit(actor, "agent.start", id, json!({ "container": handle.as_str() }));
                Ok(agent)
            }
            Err(e) => {
                error!(agent_id = %id, error = %e, "Agent failed to start");
                agent.mark_error(e.to_string());
                self.agents.save(&agent).await?;
                self.audit(actor, "agent.start_failed", id, json!({ "error": e.to_string() }));
                Err(e.into())
            }
        }
    }

    async fn stop_locked(&self, id: AgentId, actor: Actor) -> Result<Agent, LifecycleError> {
        let mut agent = self.load(id, actor).await?;
        if agent.status() == AgentStatus::Stopped {
            return Ok(agent);
        }

        let container = agent.container().cloned();
        if let Some(handle) = &container {
            if let Err(e) = self.sandbox.stop_detached(handle, self.stop_timeout).await {
                warn!(agent_id = %id, container = %handle, error = %e, "Failed to stop agent container; marking stopped");
            }
        }
        agent.mark_stopped();
        self.agents.save(&agent).await?;
        info!(agent_id = %id, "Agent stopped");
        self.audit(
            actor,
            "agent.stop",
            id,
            json!({ "container": container.as_ref().map(|h| h.as_str()) }),
        );
        Ok(agent)
    }
}

#[async_trait]
impl AgentLifecycleService for StandardAgentLifecycleService {
    async fn create_agent(&self, draft: NewAgent, owner: UserId) -> Result<Agent, LifecycleError> {
        if draft.name.trim().is_empty() {
            return Err(LifecycleError::Validation("name cannot be empty".into()));
        }
        let mut agent = Agent::new(draft.name.trim(), draft.script, owner);
        agent.description = draft.description;
        agent.config = draft.config;
        self.agents.save(&agent).await?;
        self.audit(
            Actor::User(owner),
            "agent.create",
            agent.id,
            json!({ "name": agent.name }),
        );
        Ok(agent)
    }

    async fn get_agent(&self, id: AgentId, actor: Actor) -> Result<Agent, LifecycleError> {
        self.load(id, actor).await
    }

    async fn list_agents(
        &self,
        owner: UserId,
        status: Option<AgentStatus>,
    ) -> Result<Vec<Agent>, LifecycleError> {
        let agents = self.agents.list_by_owner(owner).await?;
        Ok(agents
            .into_iter()
            .filter(|a| status.map_or(true, |s| a.status() == s))
            .collect())
    }

    async fn start_agent(&self, id: AgentId, actor: Actor) -> Result<Agent, LifecycleError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        self.start_locked(id, actor).await
    }

    async fn stop_agent(&self, id: AgentId, actor: Actor) -> Result<Agent, LifecycleError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        self.stop_locked(id, actor).await
    }

    async fn restart_agent(&self, id: AgentId, actor: Actor) -> Result<Agent, LifecycleError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        self.stop_locked(id, actor).await?;
        let agent = self.start_locked(id, actor).await?;
        self.audit(actor, "agent.restart", id, json!({}));
        Ok(agent)
    }

    async fn delete_agent(&self, id: AgentId, actor: Actor) -> Result<(), LifecycleError> {
        let lock = self.lock_for(id);
        {
            let _guard = lock.lock().await;
            self.stop_locked(id, actor).await?;

            for job in self.jobs.find_by_agent(id).await? {
                self.scheduler.unschedule_job(job.id);
            }
            self.agents.delete(id).await?;
        }
        self.locks.remove(&id);
        info!(agent_id = %id, "Agent deleted");
        self.audit(actor, "agent.delete", id, json!({}));
        Ok(())
    }
}
