// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository traits defined in
//! `crate::domain::repository`.
//!
//! ## PostgreSQL Repositories
//!
//! - **PostgresAgentRepository** - agent records and container handles
//! - **PostgresJobRepository** - job definitions and next fire times
//! - **PostgresExecutionRepository** - execution history
//!
//! ## In-Memory Repositories
//!
//! HashMap-backed storage for tests and single-process development. The
//! deletion cascade (agent → jobs → executions) is wired through the
//! constructors: each repository holds the one it cascades into.

pub mod postgres_agent;
pub mod postgres_execution;
pub mod postgres_job;

pub use postgres_agent::PostgresAgentRepository;
pub use postgres_execution::PostgresExecutionRepository;
pub use postgres_job::PostgresJobRepository;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::domain::agent::{Agent, AgentId, AgentStatus, UserId};
use crate::domain::execution::{Execution, ExecutionId};
use crate::domain::job::{Job, JobId};
use crate::domain::repository::{
    AgentRepository, ExecutionRepository, JobRepository, RepositoryError,
};

#[derive(Default)]
pub struct InMemoryExecutionRepository {
    executions: RwLock<HashMap<ExecutionId, Execution>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn save(&self, execution: &Execution) -> Result<(), RepositoryError> {
        self.executions
            .write()
            .insert(execution.id, execution.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: ExecutionId) -> Result<Option<Execution>, RepositoryError> {
        Ok(self.executions.read().get(&id).cloned())
    }

    async fn find_by_job(
        &self,
        job_id: JobId,
        limit: usize,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let mut found: Vec<Execution> = self
            .executions
            .read()
            .values()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        found.truncate(limit);
        Ok(found)
    }

    async fn delete_by_job(&self, job_id: JobId) -> Result<(), RepositoryError> {
        self.executions.write().retain(|_, e| e.job_id != job_id);
        Ok(())
    }
}

pub struct InMemoryJobRepository {
    jobs: RwLock<HashMap<JobId, Job>>,
    executions: Arc<InMemoryExecutionRepository>,
}

impl InMemoryJobRepository {
    pub fn new(executions: Arc<InMemoryExecutionRepository>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            executions,
        }
    }

    /// Soft-delete every live job bound to `agent_id`, returning their ids.
    fn soft_delete_for_agent(&self, agent_id: AgentId) -> Vec<JobId> {
        let mut jobs = self.jobs.write();
        jobs.values_mut()
            .filter(|j| j.agent_id == agent_id && !j.is_deleted())
            .map(|j| {
                j.soft_delete();
                j.id
            })
            .collect()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn save(&self, job: &Job) -> Result<(), RepositoryError> {
        self.jobs.write().insert(job.id, job.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>, RepositoryError> {
        Ok(self.jobs.read().get(&id).cloned())
    }

    async fn find_active(&self) -> Result<Vec<Job>, RepositoryError> {
        Ok(self
            .jobs
            .read()
            .values()
            .filter(|j| j.is_active && !j.is_deleted())
            .cloned()
            .collect())
    }

    async fn find_by_agent(&self, agent_id: AgentId) -> Result<Vec<Job>, RepositoryError> {
        Ok(self
            .jobs
            .read()
            .values()
            .filter(|j| j.agent_id == agent_id && !j.is_deleted())
            .cloned()
            .collect())
    }

    async fn list_by_owner(&self, owner: UserId) -> Result<Vec<Job>, RepositoryError> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .values()
            .filter(|j| j.owner == owner && !j.is_deleted())
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn update_next_run(
        &self,
        id: JobId,
        next_run: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut jobs = self.jobs.write();
        match jobs.get_mut(&id).filter(|j| j.is_schedulable()) {
            Some(job) => {
                job.next_run = Some(next_run);
                job.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn deactivate(&self, id: JobId) -> Result<bool, RepositoryError> {
        let mut jobs = self.jobs.write();
        match jobs.get_mut(&id).filter(|j| j.is_active) {
            Some(job) => {
                job.deactivate();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: JobId) -> Result<(), RepositoryError> {
        {
            let mut jobs = self.jobs.write();
            let job = jobs
                .get_mut(&id)
                .ok_or_else(|| RepositoryError::NotFound(format!("job {id}")))?;
            job.soft_delete();
        }
        self.executions.delete_by_job(id).await
    }
}

pub struct InMemoryAgentRepository {
    agents: RwLock<HashMap<AgentId, Agent>>,
    jobs: Arc<InMemoryJobRepository>,
}

impl InMemoryAgentRepository {
    pub fn new(jobs: Arc<InMemoryJobRepository>) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            jobs,
        }
    }
}

#[async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn save(&self, agent: &Agent) -> Result<(), RepositoryError> {
        self.agents.write().insert(agent.id, agent.clone());
        Ok(())
    }

    async fn save_all(&self, agents: &[Agent]) -> Result<(), RepositoryError> {
        let mut map = self.agents.write();
        for agent in agents {
            map.insert(agent.id, agent.clone());
        }
        Ok(())
    }

    async fn find_by_id(&self, id: AgentId) -> Result<Option<Agent>, RepositoryError> {
        Ok(self.agents.read().get(&id).cloned())
    }

    async fn find_by_status(&self, status: AgentStatus) -> Result<Vec<Agent>, RepositoryError> {
        Ok(self
            .agents
            .read()
            .values()
            .filter(|a| a.status() == status && !a.is_deleted())
            .cloned()
            .collect())
    }

    async fn list_by_owner(&self, owner: UserId) -> Result<Vec<Agent>, RepositoryError> {
        let mut agents: Vec<Agent> = self
            .agents
            .read()
            .values()
            .filter(|a| a.owner == owner && !a.is_deleted())
            .cloned()
            .collect();
        agents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(agents)
    }

    async fn delete(&self, id: AgentId) -> Result<(), RepositoryError> {
        {
            let mut agents = self.agents.write();
            let agent = agents
                .get_mut(&id)
                .ok_or_else(|| RepositoryError::NotFound(format!("agent {id}")))?;
            agent.soft_delete();
            agent.updated_at = Utc::now();
        }
        let removed = self.jobs.soft_delete_for_agent(id);
        for job_id in removed {
            self.jobs.executions.delete_by_job(job_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::schedule::Schedule;

    fn repos() -> (
        Arc<InMemoryExecutionRepository>,
        Arc<InMemoryJobRepository>,
        InMemoryAgentRepository,
    ) {
        let executions = Arc::new(InMemoryExecutionRepository::new());
        let jobs = Arc::new(InMemoryJobRepository::new(executions.clone()));
        let agents = InMemoryAgentRepository::new(jobs.clone());
        (executions, jobs, agents)
    }

    #[tokio::test]
    async fn test_agent_delete_cascades_to_jobs() {
        let (executions, jobs, agents) = repos();
        let owner = UserId::new();
        let agent = Agent::new("worker", None, owner);
        agents.save(&agent).await.unwrap();

        let job = Job::new(
            agent.id,
            "tick",
            Schedule::Interval { seconds: 60 },
            owner,
            Utc::now(),
        )
        .unwrap();
        jobs.save(&job).await.unwrap();
        executions.save(&Execution::start(job.id)).await.unwrap();

        agents.delete(agent.id).await.unwrap();

        assert!(agents.list_by_owner(owner).await.unwrap().is_empty());
        assert!(agents.find_by_id(agent.id).await.unwrap().unwrap().is_deleted());
        assert!(jobs.find_active().await.unwrap().is_empty());
        assert!(jobs.find_by_id(job.id).await.unwrap().unwrap().is_deleted());
        assert!(executions.find_by_job(job.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_by_job_newest_first_and_limited() {
        let (executions, _, _) = repos();
        let job_id = JobId::new();
        let mut ids = Vec::new();
        for offset in 0..3 {
            let mut exec = Execution::start(job_id);
            exec.started_at = Utc::now() + chrono::Duration::seconds(offset);
            ids.push(exec.id);
            executions.save(&exec).await.unwrap();
        }

        let found = executions.find_by_job(job_id, 2).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, ids[2]);
        assert_eq!(found[1].id, ids[1]);
    }

    #[tokio::test]
    async fn test_column_updates_leave_other_fields_alone() {
        let (_, jobs, _) = repos();
        let owner = UserId::new();
        let mut job = Job::new(
            AgentId::new(),
            "tick",
            Schedule::Interval { seconds: 60 },
            owner,
            Utc::now(),
        )
        .unwrap();
        jobs.save(&job).await.unwrap();

        // An edit lands after the caller read its copy.
        job.name = "renamed".into();
        jobs.save(&job).await.unwrap();

        let next = Utc::now() + chrono::Duration::seconds(120);
        assert!(jobs.update_next_run(job.id, next).await.unwrap());
        let stored = jobs.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(stored.next_run, Some(next));
        assert_eq!(stored.name, "renamed");

        assert!(jobs.deactivate(job.id).await.unwrap());
        assert!(!jobs.deactivate(job.id).await.unwrap());
        assert!(!jobs.update_next_run(job.id, next).await.unwrap());
        assert!(!jobs.find_by_id(job.id).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn test_delete_missing_job_is_not_found() {
        let (_, jobs, _) = repos();
        let err = jobs.delete(JobId::new()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }
}
