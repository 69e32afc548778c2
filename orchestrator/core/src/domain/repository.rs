// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for each aggregate root: one repository per
//! aggregate, interface defined here, implemented in
//! `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `AgentRepository` | `Agent` | `InMemoryAgentRepository`, `PostgresAgentRepository` |
//! | `JobRepository` | `Job` | `InMemoryJobRepository`, `PostgresJobRepository` |
//! | `ExecutionRepository` | `Execution` | `InMemoryExecutionRepository`, `PostgresExecutionRepository` |
//!
//! Persisted state is the source of truth. The scheduler's timer set and the
//! agent container handles held in memory are caches reconciled against it
//! at startup.
//!
//! ## Deletion
//!
//! Agents and jobs are soft-deleted (`deleted_at`). Deleting a job removes its
//! execution history; deleting an agent soft-deletes every job bound to it.
//! `list_*`/`find_active` calls never return soft-deleted rows, `find_by_id`
//! does so the caller can tell "gone" from "never existed".

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::agent::{Agent, AgentId, AgentStatus, UserId};
use crate::domain::execution::{Execution, ExecutionId};
use crate::domain::job::{Job, JobId};

/// Storage backend enum for pluggable persistence
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
}

/// Repository interface for Agent aggregates
#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Save agent (create or update)
    async fn save(&self, agent: &Agent) -> Result<(), RepositoryError>;

    /// Save several agents in one atomic unit.
    async fn save_all(&self, agents: &[Agent]) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: AgentId) -> Result<Option<Agent>, RepositoryError>;

    /// Non-deleted agents currently in `status`, across all owners.
    async fn find_by_status(&self, status: AgentStatus) -> Result<Vec<Agent>, RepositoryError>;

    async fn list_by_owner(&self, owner: UserId) -> Result<Vec<Agent>, RepositoryError>;

    /// Soft-delete the agent and every job bound to it.
    async fn delete(&self, id: AgentId) -> Result<(), RepositoryError>;
}

/// Repository interface for Job aggregates
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn save(&self, job: &Job) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>, RepositoryError>;

    /// Active, non-deleted jobs across all owners.
    async fn find_active(&self) -> Result<Vec<Job>, RepositoryError>;

    async fn find_by_agent(&self, agent_id: AgentId) -> Result<Vec<Job>, RepositoryError>;

    async fn list_by_owner(&self, owner: UserId) -> Result<Vec<Job>, RepositoryError>;

    /// Set `next_run` on an active, non-deleted job without touching any
    /// other column. Returns false when no such job exists.
    async fn update_next_run(
        &self,
        id: JobId,
        next_run: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Clear `is_active` alone. Returns false when the job was already
    /// inactive or is gone.
    async fn deactivate(&self, id: JobId) -> Result<bool, RepositoryError>;

    /// Soft-delete the job and drop its execution history.
    async fn delete(&self, id: JobId) -> Result<(), RepositoryError>;
}

/// Repository interface for Execution records
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn save(&self, execution: &Execution) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: ExecutionId) -> Result<Option<Execution>, RepositoryError>;

    /// Most recent first.
    async fn find_by_job(
        &self,
        job_id: JobId,
        limit: usize,
    ) -> Result<Vec<Execution>, RepositoryError>;

    async fn delete_by_job(&self, job_id: JobId) -> Result<(), RepositoryError>;
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
