// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Shutdown and Recovery
//!
//! Keeps persisted agent state and the container engine in agreement across
//! process restarts:
//!
//! | Operation | When | Effect |
//! |-----------|------|--------|
//! | [`reconcile_on_startup`](RecoveryCoordinator::reconcile_on_startup) | before the scheduler starts | `running` agents whose container is gone become `error`; exited containers are cleaned up and the agent becomes `stopped` |
//! | [`graceful_shutdown`](RecoveryCoordinator::graceful_shutdown) | process exit | stop every running agent container, mark agents `stopped` |
//! | [`cleanup_orphans`](RecoveryCoordinator::cleanup_orphans) | periodic | stop managed containers no running agent references |
//! | [`emergency_stop`](RecoveryCoordinator::emergency_stop) | operator | stop every managed container, mark every running agent `stopped` |
//!
//! Only reconciliation can fail, and only when storage is unreachable.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::application::sandbox::{SandboxRunner, KIND_LABEL};
use crate::domain::agent::{Agent, AgentStatus};
use crate::domain::audit::{AuditEntry, AuditSink, ResourceType};
use crate::domain::repository::{AgentRepository, RepositoryError};
use crate::domain::runtime::ContainerHandle;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub checked: usize,
    pub still_running: usize,
    pub marked_stopped: usize,
    pub marked_error: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub stopped: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrphanReport {
    pub scanned: usize,
    pub orphaned: usize,
    pub stopped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmergencyReport {
    pub containers_stopped: usize,
    pub container_errors: usize,
    pub agents_marked_stopped: usize,
}

pub struct RecoveryCoordinator {
    agents: Arc<dyn AgentRepository>,
    sandbox: Arc<SandboxRunner>,
    audit: Arc<dyn AuditSink>,
    stop_timeout: Duration,
    emergency_timeout: Duration,
}

impl RecoveryCoordinator {
    pub fn new(
        agents: Arc<dyn AgentRepository>,
        sandbox: Arc<SandboxRunner>,
        audit: Arc<dyn AuditSink>,
        stop_timeout: Duration,
        emergency_timeout: Duration,
    ) -> Self {
        Self {
            agents,
            sandbox,
            audit,
            stop_timeout,
            emergency_timeout,
        }
    }

    fn record(&self, action: &str, resource_type: ResourceType, id: String, details: serde_json::Value) {
        self.audit
            .record(AuditEntry::new(None, action, resource_type, id, details));
    }

    /// Revalidate every agent persisted as `running` against the engine.
    pub async fn reconcile_on_startup(&self) -> Result<ReconcileReport, RepositoryError> {
        let running = self.agents.find_by_status(AgentStatus::Running).await?;
        let mut report = ReconcileReport {
            checked: running.len(),
            ..Default::default()
        };

        let mut corrected = Vec::new();
        for mut agent in running {
            let Some(handle) = agent.container().cloned() else {
                warn!(agent_id = %agent.id, "Agent marked running without a container");
                agent.mark_error("marked running without a container handle");
                report.marked_error += 1;
                corrected.push(agent);
                continue;
            };

            match self.sandbox.container_state(&handle).await {
                Ok(Some(summary)) if summary.running => {
                    report.still_running += 1;
                }
                Ok(Some(_)) => {
                    info!(agent_id = %agent.id, container = %handle, "Agent container exited while offline");
                    if let Err(e) = self.sandbox.stop_detached(&handle, self.stop_timeout).await {
                        warn!(container = %handle, error = %e, "Failed to remove exited container");
                    }
                    agent.mark_stopped();
                    report.marked_stopped += 1;
                    corrected.push(agent);
                }
                Ok(None) => {
                    warn!(agent_id = %agent.id, container = %handle, "Agent container unknown to engine");
                    agent.mark_error(format!("container {handle} not found after restart"));
                    report.marked_error += 1;
                    corrected.push(agent);
                }
                Err(e) => {
                    warn!(agent_id = %agent.id, container = %handle, error = %e, "Cannot verify agent container");
                    agent.mark_error(format!("container state unverifiable: {e}"));
                    report.marked_error += 1;
                    corrected.push(agent);
                }
            }
        }

        for agent in &corrected {
            self.record(
                "agent.recovered",
                ResourceType::Agent,
                agent.id.to_string(),
                json!({ "status": agent.status().as_str(), "reason": agent.last_error() }),
            );
        }
        if !corrected.is_empty() {
            self.agents.save_all(&corrected).await?;
        }

        info!(
            checked = report.checked,
            still_running = report.still_running,
            marked_stopped = report.marked_stopped,
            marked_error = report.marked_error,
            "Startup reconciliation complete"
        );
        Ok(report)
    }

    /// Stop every running agent. Never fails; problems are counted and
    /// logged.
    pub async fn graceful_shutdown(&self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        let running = match self.agents.find_by_status(AgentStatus::Running).await {
            Ok(agents) => agents,
            Err(e) => {
                error!(error = %e, "Cannot list running agents during shutdown");
                return report;
            }
        };

        let mut updated: Vec<Agent> = Vec::with_capacity(running.len());
        for mut agent in running {
            match agent.container().cloned() {
                Some(handle) => match self.sandbox.stop_detached(&handle, self.stop_timeout).await {
                    Ok(()) => {
                        agent.mark_stopped();
                        report.stopped += 1;
                    }
                    Err(e) => {
                        error!(agent_id = %agent.id, container = %handle, error = %e, "Failed to stop agent during shutdown");
                        agent.mark_error(format!("shutdown stop failed: {e}"));
                        report.errors += 1;
                    }
                },
                None => {
                    warn!(agent_id = %agent.id, "Running agent had no container at shutdown");
                    agent.mark_stopped();
                    report.errors += 1;
                }
            }
            updated.push(agent);
        }

        if let Err(e) = self.agents.save_all(&updated).await {
            error!(error = %e, "Failed to persist agent states at shutdown");
        }
        info!(
            stopped = report.stopped,
            errors = report.errors,
            "Graceful agent shutdown complete"
        );
        report
    }

    /// Stop detached agent containers that no running agent references.
    /// Run-to-completion job containers are owned by their dispatch and are
    /// never swept.
    pub async fn cleanup_orphans(&self) -> OrphanReport {
        let mut report = OrphanReport::default();

        let containers: Vec<_> = match self.sandbox.list_managed().await {
            Ok(containers) => containers
                .into_iter()
                .filter(|c| c.label(KIND_LABEL) != Some("job"))
                .collect(),
            Err(e) => {
                warn!(error = %e, "Orphan sweep could not list containers");
                return report;
            }
        };
        let active: Vec<ContainerHandle> = match self.agents.find_by_status(AgentStatus::Running).await {
            Ok(agents) => agents.iter().filter_map(|a| a.container().cloned()).collect(),
            Err(e) => {
                warn!(error = %e, "Orphan sweep could not list running agents");
                return report;
            }
        };

        report.scanned = containers.len();
        for container in containers {
            if active.iter().any(|h| container.matches(h)) {
                continue;
            }
            report.orphaned += 1;
            warn!(container = %container.handle, name = ?container.name, "Stopping orphaned container");
            match self
                .sandbox
                .stop_detached(&container.handle, self.stop_timeout)
                .await
            {
                Ok(()) => report.stopped += 1,
                Err(e) => error!(container = %container.handle, error = %e, "Failed to stop orphaned container"),
            }
        }

        if report.orphaned > 0 {
            info!(
                orphaned = report.orphaned,
                stopped = report.stopped,
                "Orphan sweep complete"
            );
        }
        report
    }

    /// Stop every managed container regardless of recorded state, then mark
    /// every running agent stopped.
    pub async fn emergency_stop(&self) -> EmergencyReport {
        let mut report = EmergencyReport::default();
        warn!("Emergency stop of all sandbox containers requested");

        match self.sandbox.list_managed().await {
            Ok(containers) => {
                for container in containers {
                    match self
                        .sandbox
                        .stop_detached(&container.handle, self.emergency_timeout)
                        .await
                    {
                        Ok(()) => report.containers_stopped += 1,
                        Err(e) => {
                            error!(container = %container.handle, error = %e, "Emergency stop failed");
                            report.container_errors += 1;
                        }
                    }
                }
            }
            Err(e) => error!(error = %e, "Emergency stop could not list containers"),
        }

        match self.agents.find_by_status(AgentStatus::Running).await {
            Ok(mut agents) => {
                for agent in agents.iter_mut() {
                    agent.mark_stopped();
                }
                match self.agents.save_all(&agents).await {
                    Ok(()) => report.agents_marked_stopped = agents.len(),
                    Err(e) => error!(error = %e, "Failed to persist emergency stop"),
                }
            }
            Err(e) => error!(error = %e, "Emergency stop could not list running agents"),
        }

        self.record(
            "system.emergency_stop",
            ResourceType::System,
            "sandbox".to_string(),
            json!(report),
        );
        report
    }

    /// Run [`cleanup_orphans`](Self::cleanup_orphans) every `interval` until
    /// `cancel` fires.
    pub fn spawn_orphan_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        this.cleanup_orphans().await;
                    }
                }
            }
        })
    }
}
