// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL `JobRepository` over the `jobs` table.
//!
//! The schedule is stored flattened (`schedule_type`, `cron_expression`,
//! `interval_seconds`, `run_at`) so the table stays queryable by hand.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::warn;
use uuid::Uuid;

use crate::domain::agent::{AgentId, UserId};
use crate::domain::job::{Job, JobId};
use crate::domain::repository::{JobRepository, RepositoryError};
use crate::domain::schedule::{Schedule, ScheduleKind};

const JOB_COLUMNS: &str = r#"
    id, agent_id, name, schedule_type, cron_expression, interval_seconds, run_at,
    next_run, is_active, owner_id, created_at, updated_at, deleted_at
"#;

pub struct PostgresJobRepository {
    pool: PgPool,
}

impl PostgresJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode_rows(rows: Vec<PgRow>) -> Vec<Job> {
    rows.into_iter()
        .filter_map(|row| match row_to_job(&row) {
            Ok(job) => Some(job),
            Err(e) => {
                let id: Option<Uuid> = row.try_get("id").ok();
                warn!(job_id = ?id, error = %e, "Skipping undecodable job row");
                None
            }
        })
        .collect()
}

fn row_to_job(row: &PgRow) -> Result<Job, RepositoryError> {
    let kind_str: String = row.try_get("schedule_type")?;
    let kind: ScheduleKind = kind_str
        .parse()
        .map_err(|e: crate::domain::schedule::ScheduleError| {
            RepositoryError::Serialization(e.to_string())
        })?;

    let schedule = match kind {
        ScheduleKind::Once => {
            let run_at: Option<DateTime<Utc>> = row.try_get("run_at")?;
            Schedule::Once {
                run_at: run_at.ok_or_else(|| {
                    RepositoryError::Serialization("once job without run_at".into())
                })?,
            }
        }
        ScheduleKind::Interval => {
            let seconds: Option<i64> = row.try_get("interval_seconds")?;
            let seconds = seconds
                .filter(|s| *s > 0)
                .ok_or_else(|| {
                    RepositoryError::Serialization("interval job without positive interval".into())
                })?;
            Schedule::Interval {
                seconds: seconds as u64,
            }
        }
        ScheduleKind::Cron => {
            let expression: Option<String> = row.try_get("cron_expression")?;
            Schedule::Cron {
                expression: expression.ok_or_else(|| {
                    RepositoryError::Serialization("cron job without expression".into())
                })?,
            }
        }
    };

    Ok(Job {
        id: JobId(row.try_get("id")?),
        agent_id: AgentId(row.try_get("agent_id")?),
        name: row.try_get("name")?,
        schedule,
        next_run: row.try_get("next_run")?,
        is_active: row.try_get("is_active")?,
        owner: UserId(row.try_get("owner_id")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

#[async_trait]
impl JobRepository for PostgresJobRepository {
    async fn save(&self, job: &Job) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, agent_id, name, schedule_type, cron_expression, interval_seconds, run_at,
                next_run, is_active, owner_id, created_at, updated_at, deleted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                schedule_type = EXCLUDED.schedule_type,
                cron_expression = EXCLUDED.cron_expression,
                interval_seconds = EXCLUDED.interval_seconds,
                run_at = EXCLUDED.run_at,
                next_run = EXCLUDED.next_run,
                is_active = EXCLUDED.is_active,
                updated_at = EXCLUDED.updated_at,
                deleted_at = EXCLUDED.deleted_at
            "#,
        )
        .bind(job.id.0)
        .bind(job.agent_id.0)
        .bind(&job.name)
        .bind(job.schedule.kind().as_str())
        .bind(job.schedule.cron_expression())
        .bind(job.schedule.interval_seconds().map(|s| s as i64))
        .bind(job.schedule.run_at())
        .bind(job.next_run)
        .bind(job.is_active)
        .bind(job.owner.0)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.deleted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save job: {}", e)))?;

        Ok(())
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_job).transpose()
    }

    async fn find_active(&self) -> Result<Vec<Job>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE is_active AND deleted_at IS NULL"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(decode_rows(rows))
    }

    async fn find_by_agent(&self, agent_id: AgentId) -> Result<Vec<Job>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE agent_id = $1 AND deleted_at IS NULL"
        ))
        .bind(agent_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(decode_rows(rows))
    }

    async fn list_by_owner(&self, owner: UserId) -> Result<Vec<Job>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE owner_id = $1 AND deleted_at IS NULL ORDER BY created_at DESC"
        ))
        .bind(owner.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(decode_rows(rows))
    }

    async fn update_next_run(
        &self,
        id: JobId,
        next_run: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE jobs SET next_run = $2, updated_at = NOW() \
             WHERE id = $1 AND is_active AND deleted_at IS NULL",
        )
        .bind(id.0)
        .bind(next_run)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn deactivate(&self, id: JobId) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE jobs SET is_active = FALSE, updated_at = NOW() WHERE id = $1 AND is_active",
        )
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: JobId) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE jobs SET deleted_at = NOW(), updated_at = NOW(), is_active = FALSE \
             WHERE id = $1",
        )
        .bind(id.0)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("job {id}")));
        }

        sqlx::query("DELETE FROM executions WHERE job_id = $1")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
