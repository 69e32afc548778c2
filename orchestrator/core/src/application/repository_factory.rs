// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates concrete repository implementations based on storage backend
//! configuration, keeping the domain layer free of infrastructure types.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Select in-memory or PostgreSQL repositories at startup

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::domain::node_config::DatabaseConfig;
use crate::domain::repository::{
    AgentRepository, ExecutionRepository, JobRepository, PostgresConfig, StorageBackend,
};
use crate::infrastructure::db::Database;
use crate::infrastructure::repositories::postgres_agent::PostgresAgentRepository;
use crate::infrastructure::repositories::postgres_execution::PostgresExecutionRepository;
use crate::infrastructure::repositories::postgres_job::PostgresJobRepository;
use crate::infrastructure::repositories::{
    InMemoryAgentRepository, InMemoryExecutionRepository, InMemoryJobRepository,
};

/// The full set of repositories the services need, plus the pool backing
/// them when PostgreSQL is in use.
#[derive(Clone)]
pub struct Repositories {
    pub agents: Arc<dyn AgentRepository>,
    pub jobs: Arc<dyn JobRepository>,
    pub executions: Arc<dyn ExecutionRepository>,
    pub pool: Option<PgPool>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        let executions = Arc::new(InMemoryExecutionRepository::new());
        let jobs = Arc::new(InMemoryJobRepository::new(executions.clone()));
        let agents = Arc::new(InMemoryAgentRepository::new(jobs.clone()));
        Self {
            agents,
            jobs,
            executions,
            pool: None,
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            agents: Arc::new(PostgresAgentRepository::new(pool.clone())),
            jobs: Arc::new(PostgresJobRepository::new(pool.clone())),
            executions: Arc::new(PostgresExecutionRepository::new(pool.clone())),
            pool: Some(pool),
        }
    }
}

pub fn storage_backend(config: &DatabaseConfig) -> StorageBackend {
    match &config.url {
        Some(url) => StorageBackend::PostgreSQL(PostgresConfig {
            connection_string: url.clone(),
        }),
        None => StorageBackend::InMemory,
    }
}

/// Build repositories for `backend`. For PostgreSQL this connects and runs
/// pending migrations; an unreachable database is a startup error.
pub async fn create_repositories(backend: &StorageBackend) -> Result<Repositories> {
    match backend {
        StorageBackend::InMemory => {
            tracing::warn!("Using in-memory repositories; state will not survive a restart");
            Ok(Repositories::in_memory())
        }
        StorageBackend::PostgreSQL(config) => {
            let db = Database::new(&config.connection_string)
                .await
                .context("Failed to connect to PostgreSQL")?;
            db.migrate().await.context("Failed to run database migrations")?;
            Ok(Repositories::postgres(db.get_pool().clone()))
        }
    }
}
