// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Container engine port and sandbox outcome types.
//!
//! [`ContainerEngine`] is the thin seam between the core and whatever actually
//! runs containers (Docker via `bollard` in production, an in-process fake in
//! tests). It speaks in handles and specs only; policy such as retries,
//! timeouts and labelling lives in
//! [`SandboxRunner`](crate::application::sandbox::SandboxRunner).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Opaque container reference: the engine id, or the container name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerHandle(pub String);

impl ContainerHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub memory_bytes: Option<i64>,
    /// CPU quota in units of 1e-9 CPUs.
    pub nano_cpus: Option<i64>,
    pub cpuset_cpus: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

impl BindMount {
    pub fn to_bind_string(&self) -> String {
        let mode = if self.read_only { "ro" } else { "rw" };
        format!(
            "{}:{}:{}",
            self.host_path.display(),
            self.container_path,
            mode
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkPolicy {
    Disabled,
    /// Engine default network, or the named one.
    Enabled(Option<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartPolicy {
    Never,
    UnlessStopped,
}

/// Everything the engine needs to create and start one container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub mounts: Vec<BindMount>,
    pub limits: ResourceLimits,
    pub network: NetworkPolicy,
    pub env: Vec<String>,
    pub user: Option<String>,
    pub labels: HashMap<String, String>,
    pub restart: RestartPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    pub status_code: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub handle: ContainerHandle,
    pub name: Option<String>,
    pub running: bool,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl ContainerSummary {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// True if `handle` names this container by id or by name.
    pub fn matches(&self, handle: &ContainerHandle) -> bool {
        self.handle == *handle || self.name.as_deref() == Some(handle.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Container engine unavailable: {0}")]
    Unavailable(String),
    #[error("Container not found: {0}")]
    NotFound(String),
    #[error("Container name conflict: {0}")]
    Conflict(String),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Container engine error: {0}")]
    Engine(String),
}

impl RuntimeError {
    /// Failures worth retrying at the call site: engine hiccups, not
    /// semantic answers like "no such container".
    pub fn is_transient(&self) -> bool {
        matches!(self, RuntimeError::Unavailable(_) | RuntimeError::Engine(_))
    }
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn ping(&self) -> Result<(), RuntimeError>;

    /// Create and start a container; returns once the engine accepted it.
    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError>;

    /// Block until the container exits or `timeout` elapses
    /// (`RuntimeError::Timeout`).
    async fn wait(
        &self,
        handle: &ContainerHandle,
        timeout: Duration,
    ) -> Result<ExitInfo, RuntimeError>;

    /// Combined stdout and stderr collected so far.
    async fn logs(&self, handle: &ContainerHandle) -> Result<String, RuntimeError>;

    async fn stop(&self, handle: &ContainerHandle, timeout: Duration) -> Result<(), RuntimeError>;

    /// Remove the container; `force` kills it first if still running.
    async fn remove(&self, handle: &ContainerHandle, force: bool) -> Result<(), RuntimeError>;

    async fn list(&self, label: &str) -> Result<Vec<ContainerSummary>, RuntimeError>;

    /// `None` when the engine does not know the handle.
    async fn inspect(
        &self,
        handle: &ContainerHandle,
    ) -> Result<Option<ContainerSummary>, RuntimeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    Success,
    Failed,
    Timeout,
    Error,
}

impl SandboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxStatus::Success => "success",
            SandboxStatus::Failed => "failed",
            SandboxStatus::Timeout => "timeout",
            SandboxStatus::Error => "error",
        }
    }
}

/// Outcome of a run-to-completion sandbox execution. Non-zero exits and
/// timeouts are ordinary outcomes here, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxResult {
    pub status: SandboxStatus,
    pub exit_code: Option<i64>,
    pub output: String,
    pub error: Option<String>,
}

impl SandboxResult {
    pub fn success(output: String) -> Self {
        Self {
            status: SandboxStatus::Success,
            exit_code: Some(0),
            output,
            error: None,
        }
    }

    pub fn failed(exit_code: i64, output: String) -> Self {
        Self {
            status: SandboxStatus::Failed,
            exit_code: Some(exit_code),
            error: Some(output.clone()),
            output,
        }
    }

    pub fn timeout(partial_output: String, timeout_secs: u64) -> Self {
        Self {
            status: SandboxStatus::Timeout,
            exit_code: None,
            output: partial_output,
            error: Some(format!("Execution timed out after {timeout_secs}s")),
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            status: SandboxStatus::Error,
            exit_code: Some(-1),
            output: String::new(),
            error: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_string_modes() {
        let mount = BindMount {
            host_path: PathBuf::from("/srv/scripts/a.py"),
            container_path: "/app/script.py".into(),
            read_only: true,
        };
        assert_eq!(mount.to_bind_string(), "/srv/scripts/a.py:/app/script.py:ro");
    }

    #[test]
    fn test_transient_classification() {
        assert!(RuntimeError::Unavailable("socket".into()).is_transient());
        assert!(RuntimeError::Engine("500".into()).is_transient());
        assert!(!RuntimeError::NotFound("abc".into()).is_transient());
        assert!(!RuntimeError::Timeout(Duration::from_secs(1)).is_transient());
    }

    #[test]
    fn test_summary_matches_id_or_name() {
        let summary = ContainerSummary {
            handle: ContainerHandle::new("f00d"),
            name: Some("automa-agent-1".into()),
            running: true,
            labels: HashMap::new(),
        };
        assert!(summary.matches(&ContainerHandle::new("f00d")));
        assert!(summary.matches(&ContainerHandle::new("automa-agent-1")));
        assert!(!summary.matches(&ContainerHandle::new("other")));
    }

    #[test]
    fn test_failed_result_uses_output_as_error_detail() {
        let result = SandboxResult::failed(2, "Traceback ...".into());
        assert_eq!(result.exit_code, Some(2));
        assert_eq!(result.error.as_deref(), Some("Traceback ..."));
    }
}
