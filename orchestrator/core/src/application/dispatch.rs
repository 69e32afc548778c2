// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Job dispatch: one fire of one job, end to end.
//!
//! [`JobDispatcher::dispatch`] is the scheduler's callback. It never returns
//! an error or panics on purpose; every way a fire can go wrong is folded into
//! a [`DispatchOutcome`] and, where the job still exists, into a terminal
//! [`Execution`] row.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::application::sandbox::SandboxRunner;
use crate::domain::agent::{Agent, ScriptRef};
use crate::domain::execution::{Execution, ExecutionError};
use crate::domain::job::{Job, JobId};
use crate::domain::repository::{AgentRepository, ExecutionRepository, JobRepository, RepositoryError};

/// Why a fire was dropped without creating an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    JobNotFound,
    JobInactive,
}

#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// No execution was created.
    Skipped(SkipReason),
    /// An execution ran (or was failed before reaching the sandbox) and was
    /// finalized.
    Finished(Execution),
    /// Storage failed mid-dispatch; the execution row may be missing or left
    /// `running`.
    Errored(String),
}

impl DispatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Skipped(_) => "skipped",
            DispatchOutcome::Finished(e) => e.status().as_str(),
            DispatchOutcome::Errored(_) => "error",
        }
    }

    /// True when the job actually fired (an execution exists).
    pub fn fired(&self) -> bool {
        matches!(self, DispatchOutcome::Finished(_))
    }

    pub fn execution(&self) -> Option<&Execution> {
        match self {
            DispatchOutcome::Finished(execution) => Some(execution),
            _ => None,
        }
    }
}

pub struct JobDispatcher {
    jobs: Arc<dyn JobRepository>,
    agents: Arc<dyn AgentRepository>,
    executions: Arc<dyn ExecutionRepository>,
    sandbox: Arc<SandboxRunner>,
}

impl JobDispatcher {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        agents: Arc<dyn AgentRepository>,
        executions: Arc<dyn ExecutionRepository>,
        sandbox: Arc<SandboxRunner>,
    ) -> Self {
        Self {
            jobs,
            agents,
            executions,
            sandbox,
        }
    }

    /// Scheduled fire for `job_id`.
    pub async fn dispatch(&self, job_id: JobId) -> DispatchOutcome {
        let outcome = match self.load(job_id).await {
            Ok(None) => DispatchOutcome::Skipped(SkipReason::JobNotFound),
            Ok(Some((job, _))) if !job.is_schedulable() => {
                DispatchOutcome::Skipped(SkipReason::JobInactive)
            }
            Ok(Some((job, agent))) => self.run(&job, agent.as_ref()).await,
            Err(e) => DispatchOutcome::Errored(e.to_string()),
        };

        metrics::counter!("automa_dispatch_total", "outcome" => outcome.label()).increment(1);
        match &outcome {
            DispatchOutcome::Skipped(reason) => {
                info!(job_id = %job_id, reason = ?reason, "Skipping job fire")
            }
            DispatchOutcome::Finished(execution) => info!(
                job_id = %job_id,
                execution_id = %execution.id,
                status = %execution.status(),
                "Job fire finished"
            ),
            DispatchOutcome::Errored(reason) => {
                error!(job_id = %job_id, error = %reason, "Job dispatch failed")
            }
        }
        outcome
    }

    /// Run an already-validated job with a known script, outside the
    /// schedule. Storage failures are returned to the caller.
    pub async fn run_manual(
        &self,
        job: &Job,
        script: &ScriptRef,
    ) -> Result<Execution, RepositoryError> {
        let mut execution = Execution::start(job.id);
        self.executions.save(&execution).await?;
        let result = self.sandbox.execute(script).await;
        finalize(&mut execution, |e| e.finish(&result));
        self.executions.save(&execution).await?;
        Ok(execution)
    }

    async fn load(&self, job_id: JobId) -> Result<Option<(Job, Option<Agent>)>, RepositoryError> {
        let Some(job) = self.jobs.find_by_id(job_id).await? else {
            return Ok(None);
        };
        let agent = self
            .agents
            .find_by_id(job.agent_id)
            .await?
            .filter(|a| !a.is_deleted());
        Ok(Some((job, agent)))
    }

    async fn run(&self, job: &Job, agent: Option<&Agent>) -> DispatchOutcome {
        let script = match agent {
            None => Err(format!("Agent {} not found", job.agent_id)),
            Some(agent) => agent
                .script
                .clone()
                .ok_or_else(|| format!("Agent {} has no script bound", agent.id)),
        };

        let mut execution = Execution::start(job.id);
        if let Err(e) = self.executions.save(&execution).await {
            return DispatchOutcome::Errored(e.to_string());
        }

        match script {
            Ok(script) => {
                let result = self.sandbox.execute(&script).await;
                finalize(&mut execution, |e| e.finish(&result));
            }
            Err(reason) => {
                warn!(job_id = %job.id, reason = %reason, "Failing job fire before sandbox");
                finalize(&mut execution, |e| e.fail(reason));
            }
        }

        match self.executions.save(&execution).await {
            Ok(()) => DispatchOutcome::Finished(execution),
            Err(e) => DispatchOutcome::Errored(e.to_string()),
        }
    }
}

fn finalize<F>(execution: &mut Execution, apply: F)
where
    F: FnOnce(&mut Execution) -> Result<(), ExecutionError>,
{
    if let Err(e) = apply(execution) {
        warn!(execution_id = %execution.id, error = %e, "Execution already finalized");
    }
}
