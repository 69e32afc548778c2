// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::warn;
use uuid::Uuid;

use crate::domain::execution::{Execution, ExecutionId, ExecutionStatus};
use crate::domain::job::JobId;
use crate::domain::repository::{ExecutionRepository, RepositoryError};

pub struct PostgresExecutionRepository {
    pool: PgPool,
}

impl PostgresExecutionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_execution(row: &PgRow) -> Result<Execution, RepositoryError> {
    let status_str: String = row.try_get("status")?;
    let status = status_str
        .parse::<ExecutionStatus>()
        .map_err(RepositoryError::Serialization)?;

    Ok(Execution::restore(
        ExecutionId(row.try_get("id")?),
        JobId(row.try_get("job_id")?),
        status,
        row.try_get("started_at")?,
        row.try_get("finished_at")?,
        row.try_get("output")?,
        row.try_get("error")?,
        row.try_get("exit_code")?,
    ))
}

#[async_trait]
impl ExecutionRepository for PostgresExecutionRepository {
    async fn save(&self, execution: &Execution) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO executions (
                id, job_id, status, started_at, finished_at, output, error, exit_code
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                finished_at = EXCLUDED.finished_at,
                output = EXCLUDED.output,
                error = EXCLUDED.error,
                exit_code = EXCLUDED.exit_code
            "#,
        )
        .bind(execution.id.0)
        .bind(execution.job_id.0)
        .bind(execution.status().as_str())
        .bind(execution.started_at)
        .bind(execution.finished_at())
        .bind(execution.output())
        .bind(execution.error())
        .bind(execution.exit_code())
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save execution: {}", e)))?;

        Ok(())
    }

    async fn find_by_id(&self, id: ExecutionId) -> Result<Option<Execution>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, job_id, status, started_at, finished_at, output, error, exit_code
            FROM executions
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_execution).transpose()
    }

    async fn find_by_job(
        &self,
        job_id: JobId,
        limit: usize,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, job_id, status, started_at, finished_at, output, error, exit_code
            FROM executions
            WHERE job_id = $1
            ORDER BY started_at DESC
            LIMIT $2
            "#,
        )
        .bind(job_id.0)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| match row_to_execution(row) {
                Ok(execution) => Some(execution),
                Err(e) => {
                    let id: Option<Uuid> = row.try_get("id").ok();
                    warn!(execution_id = ?id, error = %e, "Skipping undecodable execution row");
                    None
                }
            })
            .collect())
    }

    async fn delete_by_job(&self, job_id: JobId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM executions WHERE job_id = $1")
            .bind(job_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
