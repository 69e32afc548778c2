// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Job management use cases: create, update, delete, (de)activate, run now,
//! and execution history. Every write keeps the scheduler's timer set in step
//! with storage, and read-modify-write of an existing job holds the
//! scheduler's per-job lock.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::info;

use crate::application::dispatch::JobDispatcher;
use crate::application::lifecycle::Actor;
use crate::application::scheduler::JobScheduler;
use crate::domain::agent::{AgentId, UserId};
use crate::domain::audit::{AuditEntry, AuditSink, ResourceType};
use crate::domain::execution::Execution;
use crate::domain::job::{Job, JobId, JobUpdate, NewJob};
use crate::domain::repository::{
    AgentRepository, ExecutionRepository, JobRepository, RepositoryError,
};
use crate::domain::schedule::ScheduleError;

pub const DEFAULT_EXECUTION_LIMIT: usize = 50;

#[derive(Debug, Error)]
pub enum JobServiceError {
    #[error("Job {0} not found")]
    JobNotFound(JobId),

    #[error("Agent {0} not found")]
    AgentNotFound(AgentId),

    #[error("Invalid schedule: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl JobServiceError {
    /// Rejected input, as opposed to a missing entity or a storage failure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            JobServiceError::Schedule(_) | JobServiceError::Validation(_)
        )
    }
}

#[async_trait]
pub trait JobService: Send + Sync {
    async fn create_job(&self, draft: NewJob, owner: UserId) -> Result<Job, JobServiceError>;

    async fn update_job(
        &self,
        id: JobId,
        update: JobUpdate,
        owner: UserId,
    ) -> Result<Job, JobServiceError>;

    async fn delete_job(&self, id: JobId, owner: UserId) -> Result<(), JobServiceError>;

    async fn set_active(
        &self,
        id: JobId,
        active: bool,
        owner: UserId,
    ) -> Result<Job, JobServiceError>;

    async fn get_job(&self, id: JobId, owner: UserId) -> Result<Job, JobServiceError>;

    async fn list_jobs(&self, owner: UserId) -> Result<Vec<Job>, JobServiceError>;

    /// Run the job once, now, outside its schedule. Blocks until the sandbox
    /// finishes and returns the finalized execution.
    async fn execute_job_now(&self, id: JobId, actor: Actor) -> Result<Execution, JobServiceError>;

    async fn list_executions(
        &self,
        id: JobId,
        owner: UserId,
        limit: usize,
    ) -> Result<Vec<Execution>, JobServiceError>;
}

pub struct StandardJobService {
    jobs: Arc<dyn JobRepository>,
    agents: Arc<dyn AgentRepository>,
    executions: Arc<dyn ExecutionRepository>,
    dispatcher: Arc<JobDispatcher>,
    scheduler: Arc<JobScheduler>,
    audit: Arc<dyn AuditSink>,
    once_default_delay: Duration,
}

impl StandardJobService {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        agents: Arc<dyn AgentRepository>,
        executions: Arc<dyn ExecutionRepository>,
        dispatcher: Arc<JobDispatcher>,
        scheduler: Arc<JobScheduler>,
        audit: Arc<dyn AuditSink>,
        once_default_delay: Duration,
    ) -> Self {
        Self {
            jobs,
            agents,
            executions,
            dispatcher,
            scheduler,
            audit,
            once_default_delay,
        }
    }

    async fn load(&self, id: JobId, actor: Actor) -> Result<Job, JobServiceError> {
        self.jobs
            .find_by_id(id)
            .await?
            .filter(|j| !j.is_deleted() && actor.can_access(j.owner))
            .ok_or(JobServiceError::JobNotFound(id))
    }

    async fn ensure_agent(&self, id: AgentId, owner: UserId) -> Result<(), JobServiceError> {
        self.agents
            .find_by_id(id)
            .await?
            .filter(|a| !a.is_deleted() && a.owner == owner)
            .map(|_| ())
            .ok_or(JobServiceError::AgentNotFound(id))
    }

    fn sync_schedule(&self, job: &Job) {
        if job.is_schedulable() {
            self.scheduler.schedule_job(job);
        } else {
            self.scheduler.unschedule_job(job.id);
        }
    }

    fn audit(&self, actor: Actor, action: &str, id: JobId, details: serde_json::Value) {
        self.audit.record(AuditEntry::new(
            actor.user_id(),
            action,
            ResourceType::Job,
            id,
            details,
        ));
    }
}

#[async_trait]
impl JobService for StandardJobService {
    async fn create_job(&self, draft: NewJob, owner: UserId) -> Result<Job, JobServiceError> {
        if draft.name.trim().is_empty() {
            return Err(JobServiceError::Validation("name cannot be empty".into()));
        }
        self.ensure_agent(draft.agent_id, owner).await?;

        let now = Utc::now();
        let schedule = draft.schedule(now, self.once_default_delay)?;
        let mut job = Job::new(draft.agent_id, draft.name.trim(), schedule, owner, now)?;
        job.is_active = draft.is_active;

        self.jobs.save(&job).await?;
        self.sync_schedule(&job);
        info!(job_id = %job.id, kind = %job.schedule.kind(), next_run = ?job.next_run, "Job created");
        self.audit(
            Actor::User(owner),
            "job.create",
            job.id,
            json!({ "name": job.name, "schedule_type": job.schedule.kind().as_str() }),
        );
        Ok(job)
    }

    async fn update_job(
        &self,
        id: JobId,
        update: JobUpdate,
        owner: UserId,
    ) -> Result<Job, JobServiceError> {
        let _guard = self.scheduler.lock_job(id).await;
        let mut job = self.load(id, Actor::User(owner)).await?;
        let now = Utc::now();

        if let Some(name) = &update.name {
            if name.trim().is_empty() {
                return Err(JobServiceError::Validation("name cannot be empty".into()));
            }
            job.name = name.trim().to_string();
        }
        if update.touches_schedule() {
            let schedule = update.merged_schedule(&job.schedule, now, self.once_default_delay)?;
            job.reschedule(schedule, now)?;
        }
        if let Some(active) = update.is_active {
            job.is_active = active;
        }
        job.updated_at = now;

        self.jobs.save(&job).await?;
        self.sync_schedule(&job);
        self.audit(
            Actor::User(owner),
            "job.update",
            id,
            json!({ "schedule_changed": update.touches_schedule() }),
        );
        Ok(job)
    }

    async fn delete_job(&self, id: JobId, owner: UserId) -> Result<(), JobServiceError> {
        {
            let _guard = self.scheduler.lock_job(id).await;
            self.load(id, Actor::User(owner)).await?;
            self.scheduler.unschedule_job(id);
            self.jobs.delete(id).await?;
        }
        self.scheduler.forget_job(id);
        info!(job_id = %id, "Job deleted");
        self.audit(Actor::User(owner), "job.delete", id, json!({}));
        Ok(())
    }

    async fn set_active(
        &self,
        id: JobId,
        active: bool,
        owner: UserId,
    ) -> Result<Job, JobServiceError> {
        let _guard = self.scheduler.lock_job(id).await;
        let mut job = self.load(id, Actor::User(owner)).await?;
        if job.is_active != active {
            let now = Utc::now();
            job.is_active = active;
            if active {
                // A reactivated job fires at its next occurrence from now,
                // not at a stale stored time.
                let stale = job.next_run.map_or(true, |next| next < now);
                if stale {
                    job.next_run = Some(job.schedule.first_fire(now)?);
                }
            }
            job.updated_at = now;
            self.jobs.save(&job).await?;
        }
        self.sync_schedule(&job);
        let action = if active { "job.activate" } else { "job.deactivate" };
        self.audit(Actor::User(owner), action, id, json!({}));
        Ok(job)
    }

    async fn get_job(&self, id: JobId, owner: UserId) -> Result<Job, JobServiceError> {
        self.load(id, Actor::User(owner)).await
    }

    async fn list_jobs(&self, owner: UserId) -> Result<Vec<Job>, JobServiceError> {
        Ok(self.jobs.list_by_owner(owner).await?)
    }

    async fn execute_job_now(&self, id: JobId, actor: Actor) -> Result<Execution, JobServiceError> {
        let job = self.load(id, actor).await?;
        let agent = self
            .agents
            .find_by_id(job.agent_id)
            .await?
            .filter(|a| !a.is_deleted())
            .ok_or(JobServiceError::AgentNotFound(job.agent_id))?;
        let script = agent.script.ok_or_else(|| {
            JobServiceError::Validation(format!("Agent {} has no script bound", agent.id))
        })?;

        self.audit(actor, "job.execute", id, json!({ "manual": true }));
        let execution = self.dispatcher.run_manual(&job, &script).await?;
        info!(job_id = %id, execution_id = %execution.id, status = %execution.status(), "Manual job run finished");
        Ok(execution)
    }

    async fn list_executions(
        &self,
        id: JobId,
        owner: UserId,
        limit: usize,
    ) -> Result<Vec<Execution>, JobServiceError> {
        self.load(id, Actor::User(owner)).await?;
        Ok(self.executions.find_by_job(id, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_classification() {
        assert!(JobServiceError::Validation("x".into()).is_validation());
        assert!(JobServiceError::Schedule(ScheduleError::InvalidInterval).is_validation());
        assert!(!JobServiceError::JobNotFound(JobId::new()).is_validation());
    }
}
