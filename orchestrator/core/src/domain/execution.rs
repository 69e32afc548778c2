// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Execution Records
//!
//! One [`Execution`] per script run. It is created `Running` at dispatch and
//! finalized exactly once from the sandbox result; a terminal execution
//! rejects further transitions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::job::JobId;
use crate::domain::runtime::{SandboxResult, SandboxStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failed,
    Timeout,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ExecutionStatus::Running),
            "success" => Ok(ExecutionStatus::Success),
            "failed" => Ok(ExecutionStatus::Failed),
            "timeout" => Ok(ExecutionStatus::Timeout),
            other => Err(format!("unknown execution status '{other}'")),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Execution {0} is already finished")]
    AlreadyFinished(ExecutionId),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub job_id: JobId,
    status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    output: Option<String>,
    error: Option<String>,
    exit_code: Option<i64>,
}

impl Execution {
    pub fn start(job_id: JobId) -> Self {
        Self {
            id: ExecutionId::new(),
            job_id,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            output: None,
            error: None,
            exit_code: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: ExecutionId,
        job_id: JobId,
        status: ExecutionStatus,
        started_at: DateTime<Utc>,
        finished_at: Option<DateTime<Utc>>,
        output: Option<String>,
        error: Option<String>,
        exit_code: Option<i64>,
    ) -> Self {
        Self {
            id,
            job_id,
            status,
            started_at,
            finished_at,
            output,
            error,
            exit_code,
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn exit_code(&self) -> Option<i64> {
        self.exit_code
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Finalize from a sandbox outcome. A runner-level `error` is recorded as
    /// `failed`.
    pub fn finish(&mut self, result: &SandboxResult) -> Result<(), ExecutionError> {
        let status = match result.status {
            SandboxStatus::Success => ExecutionStatus::Success,
            SandboxStatus::Failed | SandboxStatus::Error => ExecutionStatus::Failed,
            SandboxStatus::Timeout => ExecutionStatus::Timeout,
        };
        self.transition(
            status,
            Some(result.output.clone()).filter(|o| !o.is_empty()),
            result.error.clone(),
            result.exit_code,
        )
    }

    /// Finalize as `failed` without having reached the sandbox.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), ExecutionError> {
        self.transition(ExecutionStatus::Failed, None, Some(reason.into()), None)
    }

    fn transition(
        &mut self,
        status: ExecutionStatus,
        output: Option<String>,
        error: Option<String>,
        exit_code: Option<i64>,
    ) -> Result<(), ExecutionError> {
        if self.is_terminal() {
            return Err(ExecutionError::AlreadyFinished(self.id));
        }
        self.status = status;
        self.output = output;
        self.error = error;
        self.exit_code = exit_code;
        self.finished_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_sets_end_time_once() {
        let mut execution = Execution::start(JobId::new());
        assert_eq!(execution.status(), ExecutionStatus::Running);
        assert!(execution.finished_at().is_none());

        execution
            .finish(&SandboxResult::success("hello\n".into()))
            .unwrap();
        assert_eq!(execution.status(), ExecutionStatus::Success);
        assert_eq!(execution.output(), Some("hello\n"));
        assert_eq!(execution.exit_code(), Some(0));
        let finished = execution.finished_at().unwrap();

        let err = execution.fail("late").unwrap_err();
        assert_eq!(err, ExecutionError::AlreadyFinished(execution.id));
        assert_eq!(execution.finished_at(), Some(finished));
        assert_eq!(execution.status(), ExecutionStatus::Success);
    }

    #[test]
    fn test_runner_error_is_recorded_as_failed() {
        let mut execution = Execution::start(JobId::new());
        execution
            .finish(&SandboxResult::error("engine unavailable"))
            .unwrap();
        assert_eq!(execution.status(), ExecutionStatus::Failed);
        assert_eq!(execution.exit_code(), Some(-1));
        assert_eq!(execution.error(), Some("engine unavailable"));
        assert!(execution.output().is_none());
    }

    #[test]
    fn test_timeout_keeps_partial_output() {
        let mut execution = Execution::start(JobId::new());
        execution
            .finish(&SandboxResult::timeout("tick 1\ntick 2\n".into(), 300))
            .unwrap();
        assert_eq!(execution.status(), ExecutionStatus::Timeout);
        assert_eq!(execution.output(), Some("tick 1\ntick 2\n"));
        assert!(execution.finished_at().is_some());
    }
}
