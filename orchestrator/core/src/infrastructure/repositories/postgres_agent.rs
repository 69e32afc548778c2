// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Agent Repository
//!
//! `AgentRepository` backed by the `agents` table. Rows that fail to decode
//! are logged and skipped by list queries so one corrupt record cannot hide
//! every other agent.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::warn;
use uuid::Uuid;

use crate::domain::agent::{Agent, AgentId, AgentStatus, ScriptId, ScriptRef, UserId};
use crate::domain::repository::{AgentRepository, RepositoryError};
use crate::domain::runtime::ContainerHandle;

const AGENT_COLUMNS: &str = r#"
    id, name, description, script_id, script_path, config_json, is_active,
    status, container_id, last_error, owner_id, created_at, updated_at, deleted_at
"#;

pub struct PostgresAgentRepository {
    pool: PgPool,
}

impl PostgresAgentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn upsert(tx: &mut Transaction<'_, Postgres>, agent: &Agent) -> Result<(), RepositoryError> {
        let config_json = serde_json::to_value(&agent.config)?;

        sqlx::query(
            r#"
            INSERT INTO agents (
                id, name, description, script_id, script_path, config_json, is_active,
                status, container_id, last_error, owner_id, created_at, updated_at, deleted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                script_id = EXCLUDED.script_id,
                script_path = EXCLUDED.script_path,
                config_json = EXCLUDED.config_json,
                is_active = EXCLUDED.is_active,
                status = EXCLUDED.status,
                container_id = EXCLUDED.container_id,
                last_error = EXCLUDED.last_error,
                updated_at = EXCLUDED.updated_at,
                deleted_at = EXCLUDED.deleted_at
            "#,
        )
        .bind(agent.id.0)
        .bind(&agent.name)
        .bind(&agent.description)
        .bind(agent.script.as_ref().map(|s| s.id.0))
        .bind(
            agent
                .script
                .as_ref()
                .map(|s| s.file_path.to_string_lossy().into_owned()),
        )
        .bind(config_json)
        .bind(agent.is_active)
        .bind(agent.status().as_str())
        .bind(agent.container().map(|h| h.as_str().to_string()))
        .bind(agent.last_error())
        .bind(agent.owner.0)
        .bind(agent.created_at)
        .bind(agent.updated_at)
        .bind(agent.deleted_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save agent: {}", e)))?;

        Ok(())
    }

    async fn fetch_list(&self, query: &str, bind: Uuid) -> Result<Vec<Agent>, RepositoryError> {
        let rows = sqlx::query(query)
            .bind(bind)
            .fetch_all(&self.pool)
            .await?;
        Ok(decode_rows(rows))
    }
}

fn decode_rows(rows: Vec<PgRow>) -> Vec<Agent> {
    rows.into_iter()
        .filter_map(|row| match row_to_agent(&row) {
            Ok(agent) => Some(agent),
            Err(e) => {
                let id: Option<Uuid> = row.try_get("id").ok();
                warn!(agent_id = ?id, error = %e, "Skipping undecodable agent row");
                None
            }
        })
        .collect()
}

fn row_to_agent(row: &PgRow) -> Result<Agent, RepositoryError> {
    let status_str: String = row.try_get("status")?;
    let status = status_str
        .parse::<AgentStatus>()
        .map_err(RepositoryError::Serialization)?;

    let script_id: Option<Uuid> = row.try_get("script_id")?;
    let script_path: Option<String> = row.try_get("script_path")?;
    let script = match (script_id, script_path) {
        (Some(id), Some(path)) => Some(ScriptRef {
            id: ScriptId(id),
            file_path: path.into(),
        }),
        _ => None,
    };

    let config_val: serde_json::Value = row.try_get("config_json")?;
    let config: HashMap<String, serde_json::Value> = if config_val.is_null() {
        HashMap::new()
    } else {
        serde_json::from_value(config_val)?
    };

    let container_id: Option<String> = row.try_get("container_id")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
    let deleted_at: Option<DateTime<Utc>> = row.try_get("deleted_at")?;

    Ok(Agent::restore(
        AgentId(row.try_get("id")?),
        row.try_get("name")?,
        row.try_get("description")?,
        script,
        config,
        row.try_get("is_active")?,
        status,
        container_id.map(ContainerHandle::new),
        row.try_get("last_error")?,
        UserId(row.try_get("owner_id")?),
        created_at,
        updated_at,
        deleted_at,
    ))
}

#[async_trait]
impl AgentRepository for PostgresAgentRepository {
    async fn save(&self, agent: &Agent) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        Self::upsert(&mut tx, agent).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn save_all(&self, agents: &[Agent]) -> Result<(), RepositoryError> {
        if agents.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for agent in agents {
            Self::upsert(&mut tx, agent).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: AgentId) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_agent).transpose()
    }

    async fn find_by_status(&self, status: AgentStatus) -> Result<Vec<Agent>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents WHERE status = $1 AND deleted_at IS NULL"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(decode_rows(rows))
    }

    async fn list_by_owner(&self, owner: UserId) -> Result<Vec<Agent>, RepositoryError> {
        self.fetch_list(
            &format!(
                "SELECT {AGENT_COLUMNS} FROM agents \
                 WHERE owner_id = $1 AND deleted_at IS NULL ORDER BY created_at DESC"
            ),
            owner.0,
        )
        .await
    }

    async fn delete(&self, id: AgentId) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE agents SET deleted_at = NOW(), updated_at = NOW(), is_active = FALSE \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id.0)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("agent {id}")));
        }

        sqlx::query(
            "DELETE FROM executions WHERE job_id IN \
             (SELECT id FROM jobs WHERE agent_id = $1 AND deleted_at IS NULL)",
        )
        .bind(id.0)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE jobs SET deleted_at = NOW(), updated_at = NOW(), is_active = FALSE \
             WHERE agent_id = $1 AND deleted_at IS NULL",
        )
        .bind(id.0)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
