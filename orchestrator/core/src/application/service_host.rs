// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Process-level owner of the scheduling core.
//!
//! [`ServiceHost`] wires every service from one [`NodeConfigManifest`] and
//! exposes the startup and shutdown sequence:
//!
//! 1. `init_scheduler`: reconcile running agents against the engine, arm all
//!    active jobs, start the tick loop and the orphan sweeper.
//! 2. `shutdown_scheduler`: stop the sweeper and the tick loop, drain
//!    in-flight dispatches, stop every running agent.
//!
//! Nothing here is global; the host is built once by the binary and handed
//! around by reference.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::dispatch::JobDispatcher;
use crate::application::job_service::{JobService, StandardJobService};
use crate::application::lifecycle::{AgentLifecycleService, StandardAgentLifecycleService};
use crate::application::recovery::{RecoveryCoordinator, ShutdownReport};
use crate::application::repository_factory::Repositories;
use crate::application::retry::RetryPolicy;
use crate::application::sandbox::{SandboxRunner, SandboxSettings};
use crate::application::scheduler::{JobScheduler, SchedulerSettings};
use crate::domain::audit::AuditSink;
use crate::domain::node_config::NodeConfigManifest;
use crate::domain::runtime::ContainerEngine;

pub struct ServiceHost {
    pub repositories: Repositories,
    pub sandbox: Arc<SandboxRunner>,
    pub dispatcher: Arc<JobDispatcher>,
    pub scheduler: Arc<JobScheduler>,
    pub agents: Arc<dyn AgentLifecycleService>,
    pub jobs: Arc<dyn JobService>,
    pub recovery: Arc<RecoveryCoordinator>,
    orphan_sweep_interval: Option<Duration>,
    maintenance: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceHost {
    pub fn new(
        config: &NodeConfigManifest,
        repositories: Repositories,
        engine: Arc<dyn ContainerEngine>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        let spec = &config.spec;
        let settings =
            SandboxSettings::from_config(&spec.sandbox).context("Invalid sandbox configuration")?;
        let sandbox = Arc::new(SandboxRunner::new(
            engine,
            settings,
            RetryPolicy::from(&spec.retry),
        ));

        let dispatcher = Arc::new(JobDispatcher::new(
            repositories.jobs.clone(),
            repositories.agents.clone(),
            repositories.executions.clone(),
            sandbox.clone(),
        ));
        let scheduler = Arc::new(JobScheduler::new(
            repositories.jobs.clone(),
            dispatcher.clone(),
            SchedulerSettings::from(&spec.scheduler),
        ));

        let agents: Arc<dyn AgentLifecycleService> = Arc::new(StandardAgentLifecycleService::new(
            repositories.agents.clone(),
            repositories.jobs.clone(),
            sandbox.clone(),
            scheduler.clone(),
            audit.clone(),
            spec.sandbox.stop_timeout(),
        ));
        let jobs: Arc<dyn JobService> = Arc::new(StandardJobService::new(
            repositories.jobs.clone(),
            repositories.agents.clone(),
            repositories.executions.clone(),
            dispatcher.clone(),
            scheduler.clone(),
            audit.clone(),
            chrono::Duration::seconds(spec.scheduler.once_default_delay_seconds as i64),
        ));
        let recovery = Arc::new(RecoveryCoordinator::new(
            repositories.agents.clone(),
            sandbox.clone(),
            audit,
            spec.sandbox.stop_timeout(),
            spec.sandbox.emergency_stop_timeout(),
        ));

        let sweep = spec.maintenance.orphan_sweep_interval_seconds;
        Ok(Self {
            repositories,
            sandbox,
            dispatcher,
            scheduler,
            agents,
            jobs,
            recovery,
            orphan_sweep_interval: (sweep > 0).then(|| Duration::from_secs(sweep)),
            maintenance: CancellationToken::new(),
            sweeper: Mutex::new(None),
        })
    }

    /// Reconcile, then start scheduling. Fails only if storage is unreachable
    /// or the scheduler was already started.
    pub async fn init_scheduler(&self) -> Result<()> {
        let report = self
            .recovery
            .reconcile_on_startup()
            .await
            .context("Startup reconciliation failed")?;
        if report.marked_error + report.marked_stopped > 0 {
            warn!(
                marked_error = report.marked_error,
                marked_stopped = report.marked_stopped,
                "Corrected stale agent state at startup"
            );
        }

        let armed = self
            .scheduler
            .init()
            .await
            .context("Failed to start job scheduler")?;

        if let Some(interval) = self.orphan_sweep_interval {
            let handle = self
                .recovery
                .spawn_orphan_sweeper(interval, self.maintenance.clone());
            *self.sweeper.lock() = Some(handle);
        }

        info!(armed, "Scheduling core initialized");
        Ok(())
    }

    pub async fn shutdown_scheduler(&self) -> ShutdownReport {
        self.maintenance.cancel();
        let sweeper = self.sweeper.lock().take();
        if let Some(handle) = sweeper {
            if let Err(e) = handle.await {
                warn!(error = %e, "Orphan sweeper ended abnormally");
            }
        }

        self.scheduler.shutdown().await;
        self.recovery.graceful_shutdown().await
    }
}
