// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Sandbox Runner
//!
//! Runs user scripts inside isolated, resource-limited containers through a
//! [`ContainerEngine`].
//!
//! Two modes:
//!
//! - [`SandboxRunner::execute`]: run to completion. Script bind-mounted
//!   read-only, memory and CPU capped, no network, non-root user. Waits up to
//!   the configured timeout, collects combined output, then removes the
//!   container. On timeout the container is force-removed after the partial
//!   output is collected.
//! - [`SandboxRunner::start_detached`] / [`SandboxRunner::stop_detached`]:
//!   long-lived agent containers with network and a restart policy, addressed
//!   by a deterministic per-agent name.
//!
//! Every container the runner creates carries the [`MANAGED_LABEL`] label so
//! orphan sweeps can find it. Engine calls are wrapped in [`retry_async`]
//! with [`RuntimeError::is_transient`] as the predicate.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::retry::{retry_async, RetryPolicy};
use crate::domain::agent::{AgentId, ScriptRef};
use crate::domain::node_config::SandboxConfig;
use crate::domain::runtime::{
    BindMount, ContainerEngine, ContainerHandle, ContainerSpec, ContainerSummary, NetworkPolicy,
    ResourceLimits, RestartPolicy, RuntimeError, SandboxResult,
};

pub const MANAGED_LABEL: &str = "automa.managed";
pub const AGENT_LABEL: &str = "automa.agent_id";
pub const KIND_LABEL: &str = "automa.kind";

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Script file not found: {0}")]
    ScriptMissing(PathBuf),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Resolved sandbox settings. Built once from [`SandboxConfig`] so a bad
/// memory string fails at startup rather than on first dispatch.
#[derive(Debug, Clone)]
pub struct SandboxSettings {
    pub image: String,
    pub command: Vec<String>,
    pub script_mount_path: String,
    pub limits: ResourceLimits,
    pub user: Option<String>,
    pub timeout: Duration,
    pub agent_network: Option<String>,
}

impl SandboxSettings {
    pub fn from_config(config: &SandboxConfig) -> anyhow::Result<Self> {
        Ok(Self {
            image: config.image.clone(),
            command: config.command.clone(),
            script_mount_path: config.script_mount_path.clone(),
            limits: ResourceLimits {
                memory_bytes: Some(config.memory_bytes()?),
                nano_cpus: Some(config.nano_cpus()),
                cpuset_cpus: Some(config.cpuset_cpus.clone()).filter(|c| !c.is_empty()),
            },
            user: Some(config.user.clone()).filter(|u| !u.is_empty()),
            timeout: config.timeout(),
            agent_network: config.agent_network.clone(),
        })
    }
}

impl Default for SandboxSettings {
    fn default() -> Self {
        let config = SandboxConfig::default();
        Self {
            image: config.image,
            command: config.command,
            script_mount_path: config.script_mount_path,
            limits: ResourceLimits {
                memory_bytes: Some(256 * 1024 * 1024),
                nano_cpus: Some(500_000_000),
                cpuset_cpus: Some(config.cpuset_cpus),
            },
            user: Some(config.user),
            timeout: Duration::from_secs(config.timeout_seconds),
            agent_network: None,
        }
    }
}

/// Deterministic container name for an agent's detached container.
pub fn agent_container_name(agent_id: AgentId) -> String {
    format!("automa-agent-{agent_id}")
}

pub struct SandboxRunner {
    engine: Arc<dyn ContainerEngine>,
    settings: SandboxSettings,
    retry: RetryPolicy,
}

impl SandboxRunner {
    pub fn new(engine: Arc<dyn ContainerEngine>, settings: SandboxSettings, retry: RetryPolicy) -> Self {
        Self {
            engine,
            settings,
            retry,
        }
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    pub async fn health_check(&self) -> Result<(), RuntimeError> {
        self.engine.ping().await
    }

    fn base_spec(&self, name: String, script: &ScriptRef, kind: &str) -> ContainerSpec {
        let labels = HashMap::from([
            (MANAGED_LABEL.to_string(), "true".to_string()),
            (KIND_LABEL.to_string(), kind.to_string()),
        ]);
        ContainerSpec {
            name,
            image: self.settings.image.clone(),
            command: self.settings.command.clone(),
            mounts: vec![BindMount {
                host_path: script.file_path.clone(),
                container_path: self.settings.script_mount_path.clone(),
                read_only: true,
            }],
            limits: self.settings.limits.clone(),
            network: NetworkPolicy::Disabled,
            env: Vec::new(),
            user: self.settings.user.clone(),
            labels,
            restart: RestartPolicy::Never,
        }
    }

    /// Run `script` to completion. Never returns an error: engine failures
    /// come back as a result with status `error`.
    pub async fn execute(&self, script: &ScriptRef) -> SandboxResult {
        let result = self.execute_inner(script).await;
        metrics::counter!("automa_sandbox_runs_total", "status" => result.status.as_str())
            .increment(1);
        result
    }

    async fn execute_inner(&self, script: &ScriptRef) -> SandboxResult {
        if !script.file_path.exists() {
            warn!(path = %script.file_path.display(), "Script file missing, not launching sandbox");
            return SandboxResult::error(
                SandboxError::ScriptMissing(script.file_path.clone()).to_string(),
            );
        }

        let short = Uuid::new_v4().simple().to_string();
        let name = format!("automa-script-{}-{}", script.id, &short[..8]);
        let spec = self.base_spec(name, script, "job");

        let handle = match retry_async(&self.retry, "run", RuntimeError::is_transient, || {
            self.engine.run(&spec)
        })
        .await
        {
            Ok(handle) => handle,
            Err(e) => {
                error!(script_id = %script.id, error = %e, "Failed to launch sandbox container");
                return SandboxResult::error(e.to_string());
            }
        };
        debug!(container = %handle, "Sandbox container started");

        let timeout = self.settings.timeout;
        match self.engine.wait(&handle, timeout).await {
            Ok(exit) => {
                let output = self.collect_logs(&handle).await;
                self.discard(&handle).await;
                if exit.status_code == 0 {
                    SandboxResult::success(output)
                } else {
                    SandboxResult::failed(exit.status_code, output)
                }
            }
            Err(RuntimeError::Timeout(_)) => {
                warn!(container = %handle, timeout_secs = timeout.as_secs(), "Sandbox execution timed out, killing container");
                let output = self.collect_logs(&handle).await;
                self.kill(&handle).await;
                SandboxResult::timeout(output, timeout.as_secs())
            }
            Err(e) => {
                error!(container = %handle, error = %e, "Waiting on sandbox container failed");
                self.kill(&handle).await;
                SandboxResult::error(e.to_string())
            }
        }
    }

    async fn collect_logs(&self, handle: &ContainerHandle) -> String {
        match self.engine.logs(handle).await {
            Ok(output) => output,
            Err(e) => {
                warn!(container = %handle, error = %e, "Failed to collect container output");
                String::new()
            }
        }
    }

    async fn discard(&self, handle: &ContainerHandle) {
        if let Err(e) = self.remove(handle, false).await {
            warn!(container = %handle, error = %e, "Failed to remove finished container");
        }
    }

    /// Force-remove and confirm the container is gone or no longer running.
    async fn kill(&self, handle: &ContainerHandle) {
        if let Err(e) = self.remove(handle, true).await {
            error!(container = %handle, error = %e, "Failed to kill sandbox container");
            return;
        }
        match self.engine.inspect(handle).await {
            Ok(Some(summary)) if summary.running => {
                error!(container = %handle, "Sandbox container still running after forced removal");
            }
            Ok(_) => debug!(container = %handle, "Sandbox container confirmed stopped"),
            Err(e) => warn!(container = %handle, error = %e, "Could not confirm container state"),
        }
    }

    async fn remove(&self, handle: &ContainerHandle, force: bool) -> Result<(), RuntimeError> {
        let result = retry_async(&self.retry, "remove", RuntimeError::is_transient, || {
            self.engine.remove(handle, force)
        })
        .await;
        match result {
            Err(RuntimeError::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    /// Launch a long-lived container for an agent. Any container already
    /// holding the agent's deterministic name is force-removed first.
    pub async fn start_detached(
        &self,
        script: &ScriptRef,
        agent_id: AgentId,
        env: Vec<String>,
    ) -> Result<ContainerHandle, SandboxError> {
        if !script.file_path.exists() {
            return Err(SandboxError::ScriptMissing(script.file_path.clone()));
        }

        let name = agent_container_name(agent_id);
        self.remove(&ContainerHandle::new(name.clone()), true).await?;

        let mut spec = self.base_spec(name, script, "agent");
        spec.network = NetworkPolicy::Enabled(self.settings.agent_network.clone());
        spec.restart = RestartPolicy::UnlessStopped;
        spec.env = env;
        spec.labels
            .insert(AGENT_LABEL.to_string(), agent_id.to_string());

        let handle = retry_async(&self.retry, "run", RuntimeError::is_transient, || {
            self.engine.run(&spec)
        })
        .await?;
        info!(agent_id = %agent_id, container = %handle, "Detached agent container started");
        Ok(handle)
    }

    /// Stop then remove. A container the engine no longer knows counts as
    /// stopped.
    pub async fn stop_detached(
        &self,
        handle: &ContainerHandle,
        timeout: Duration,
    ) -> Result<(), SandboxError> {
        let stopped = retry_async(&self.retry, "stop", RuntimeError::is_transient, || {
            self.engine.stop(handle, timeout)
        })
        .await;
        match stopped {
            Ok(()) => {}
            Err(RuntimeError::NotFound(_)) => {
                debug!(container = %handle, "Container already gone");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
        self.remove(handle, true).await?;
        info!(container = %handle, "Detached container stopped");
        Ok(())
    }

    /// Every container carrying the managed label.
    pub async fn list_managed(&self) -> Result<Vec<ContainerSummary>, SandboxError> {
        let label = format!("{MANAGED_LABEL}=true");
        Ok(retry_async(&self.retry, "list", RuntimeError::is_transient, || {
            self.engine.list(&label)
        })
        .await?)
    }

    /// Current engine view of `handle`; `None` if unknown.
    pub async fn container_state(
        &self,
        handle: &ContainerHandle,
    ) -> Result<Option<ContainerSummary>, SandboxError> {
        Ok(retry_async(&self.retry, "inspect", RuntimeError::is_transient, || {
            self.engine.inspect(handle)
        })
        .await?)
    }
}
