// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Job Aggregate
//!
//! A [`Job`] binds one agent to a [`Schedule`]. The persisted `next_run`
//! mirrors the scheduler's in-memory timer for the job and is the value the
//! scheduler re-arms from after a restart.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::agent::{AgentId, UserId};
use crate::domain::schedule::{Schedule, ScheduleError, ScheduleKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub agent_id: AgentId,
    pub name: String,
    pub schedule: Schedule,
    pub next_run: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub owner: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        agent_id: AgentId,
        name: impl Into<String>,
        schedule: Schedule,
        owner: UserId,
        now: DateTime<Utc>,
    ) -> Result<Self, ScheduleError> {
        let next_run = schedule.first_fire(now)?;
        Ok(Self {
            id: JobId::new(),
            agent_id,
            name: name.into(),
            schedule,
            next_run: Some(next_run),
            is_active: true,
            owner,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Eligible for the live timer set.
    pub fn is_schedulable(&self) -> bool {
        self.is_active && !self.is_deleted()
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
        self.updated_at = Utc::now();
    }

    pub fn soft_delete(&mut self) {
        let now = Utc::now();
        self.is_active = false;
        self.deleted_at = Some(now);
        self.updated_at = now;
    }

    /// Replace the schedule and recompute `next_run` from `now`.
    pub fn reschedule(&mut self, schedule: Schedule, now: DateTime<Utc>) -> Result<(), ScheduleError> {
        self.next_run = Some(schedule.first_fire(now)?);
        self.schedule = schedule;
        self.updated_at = now;
        Ok(())
    }
}

/// Input for creating a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub agent_id: AgentId,
    pub name: String,
    pub schedule_type: ScheduleKind,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub interval_seconds: Option<u64>,
    #[serde(default)]
    pub run_at: Option<DateTime<Utc>>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl NewJob {
    pub fn schedule(
        &self,
        now: DateTime<Utc>,
        once_default_delay: Duration,
    ) -> Result<Schedule, ScheduleError> {
        Schedule::from_parts(
            self.schedule_type,
            self.run_at,
            self.interval_seconds,
            self.cron_expression.as_deref(),
            now,
            once_default_delay,
        )
    }
}

/// Partial update. Any schedule field present rebuilds the schedule from the
/// merged values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobUpdate {
    pub name: Option<String>,
    pub schedule_type: Option<ScheduleKind>,
    pub cron_expression: Option<String>,
    pub interval_seconds: Option<u64>,
    pub run_at: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
}

impl JobUpdate {
    pub fn touches_schedule(&self) -> bool {
        self.schedule_type.is_some()
            || self.cron_expression.is_some()
            || self.interval_seconds.is_some()
            || self.run_at.is_some()
    }

    /// Merge the update's schedule fields over `current`.
    pub fn merged_schedule(
        &self,
        current: &Schedule,
        now: DateTime<Utc>,
        once_default_delay: Duration,
    ) -> Result<Schedule, ScheduleError> {
        let kind = self.schedule_type.unwrap_or_else(|| current.kind());
        let cron = self
            .cron_expression
            .as_deref()
            .or_else(|| current.cron_expression());
        Schedule::from_parts(
            kind,
            self.run_at.or_else(|| current.run_at()),
            self.interval_seconds.or_else(|| current.interval_seconds()),
            cron,
            now,
            once_default_delay,
        )
    }
}
