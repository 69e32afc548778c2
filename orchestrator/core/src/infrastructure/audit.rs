// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Audit sink adapters.
//!
//! - [`TracingAuditSink`]: one structured `INFO` event per entry on the
//!   `automa::audit` target.
//! - [`PostgresAuditSink`]: inserts into `audit_log` on a spawned task; insert
//!   failures are logged and dropped.

use sqlx::postgres::PgPool;
use tracing::{info, warn};

use crate::domain::audit::{AuditEntry, AuditSink};

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: AuditEntry) {
        info!(
            target: "automa::audit",
            action = %entry.action,
            resource_type = entry.resource_type.as_str(),
            resource_id = %entry.resource_id,
            user_id = ?entry.user_id.map(|u| u.0),
            details = %entry.details,
            "audit"
        );
    }
}

#[derive(Clone)]
pub struct PostgresAuditSink {
    pool: PgPool,
}

impl PostgresAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AuditSink for PostgresAuditSink {
    fn record(&self, entry: AuditEntry) {
        let pool = self.pool.clone();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(action = %entry.action, "No runtime available; audit entry dropped");
            return;
        };
        runtime.spawn(async move {
            let result = sqlx::query(
                r#"
                INSERT INTO audit_log (user_id, action, resource_type, resource_id, details, recorded_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(entry.user_id.map(|u| u.0))
            .bind(&entry.action)
            .bind(entry.resource_type.as_str())
            .bind(&entry.resource_id)
            .bind(&entry.details)
            .bind(entry.recorded_at)
            .execute(&pool)
            .await;

            if let Err(e) = result {
                warn!(action = %entry.action, resource_id = %entry.resource_id, error = %e, "Failed to persist audit entry");
            }
        });
    }
}
