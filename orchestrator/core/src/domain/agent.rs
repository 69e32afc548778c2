// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Aggregate
//!
//! An [`Agent`] binds a user-owned script to its runtime configuration and
//! tracks the long-lived ("detached") container that runs it.
//!
//! ## State machine
//!
//! ```text
//! stopped --start--> running --stop--> stopped
//!    any  --start failure--> error --stop--> stopped
//! ```
//!
//! `status == Running` holds exactly when `container` is `Some`. Every mutator
//! on this type keeps the pair in step; nothing outside this module assigns
//! either field directly.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::runtime::ContainerHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScriptId(pub Uuid);

impl ScriptId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ScriptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owning user of agents and jobs. Authentication happens upstream; the core
/// only uses this to scope reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to the script file an agent runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptRef {
    pub id: ScriptId,
    /// Host path of the script; bind-mounted read-only into the sandbox.
    pub file_path: PathBuf,
}

impl ScriptRef {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            id: ScriptId::new(),
            file_path: file_path.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Stopped,
    Running,
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Stopped => "stopped",
            AgentStatus::Running => "running",
            AgentStatus::Error => "error",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stopped" => Ok(AgentStatus::Stopped),
            "running" => Ok(AgentStatus::Running),
            "error" => Ok(AgentStatus::Error),
            other => Err(format!("unknown agent status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub description: Option<String>,
    pub script: Option<ScriptRef>,
    /// Free-form runtime configuration. Scalar entries are exported to the
    /// detached container as environment variables.
    pub config: HashMap<String, serde_json::Value>,
    pub is_active: bool,
    status: AgentStatus,
    container: Option<ContainerHandle>,
    last_error: Option<String>,
    pub owner: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn new(name: impl Into<String>, script: Option<ScriptRef>, owner: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: AgentId::new(),
            name: name.into(),
            description: None,
            script,
            config: HashMap::new(),
            is_active: true,
            status: AgentStatus::Stopped,
            container: None,
            last_error: None,
            owner,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Rebuild an agent from persisted columns. A stored `running` status with
    /// no handle is kept as-is so startup reconciliation can see and fix it.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: AgentId,
        name: String,
        description: Option<String>,
        script: Option<ScriptRef>,
        config: HashMap<String, serde_json::Value>,
        is_active: bool,
        status: AgentStatus,
        container: Option<ContainerHandle>,
        last_error: Option<String>,
        owner: UserId,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        deleted_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            name,
            description,
            script,
            config,
            is_active,
            status,
            container,
            last_error,
            owner,
            created_at,
            updated_at,
            deleted_at,
        }
    }

    pub fn status(&self) -> AgentStatus {
        self.status
    }

    pub fn container(&self) -> Option<&ContainerHandle> {
        self.container.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_running(&self) -> bool {
        self.status == AgentStatus::Running
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn mark_running(&mut self, handle: ContainerHandle) {
        self.status = AgentStatus::Running;
        self.container = Some(handle);
        self.last_error = None;
        self.updated_at = Utc::now();
    }

    pub fn mark_stopped(&mut self) {
        self.status = AgentStatus::Stopped;
        self.container = None;
        self.updated_at = Utc::now();
    }

    pub fn mark_error(&mut self, reason: impl Into<String>) {
        self.status = AgentStatus::Error;
        self.container = None;
        self.last_error = Some(reason.into());
        self.updated_at = Utc::now();
    }

    pub fn soft_delete(&mut self) {
        let now = Utc::now();
        self.is_active = false;
        self.deleted_at = Some(now);
        self.updated_at = now;
    }

    /// `KEY=value` pairs for the detached container. Non-scalar config values
    /// are not exported.
    pub fn env_vars(&self) -> Vec<String> {
        let mut vars: Vec<String> = self
            .config
            .iter()
            .filter_map(|(key, value)| {
                let rendered = match value {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Number(n) => n.to_string(),
                    serde_json::Value::Bool(b) => b.to_string(),
                    _ => return None,
                };
                Some(format!("{}={}", key.to_uppercase(), rendered))
            })
            .collect();
        vars.sort();
        vars.push(format!("AUTOMA_AGENT_ID={}", self.id));
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> Agent {
        Agent::new("reporter", Some(ScriptRef::new("/srv/scripts/report.py")), UserId::new())
    }

    #[test]
    fn test_new_agent_is_stopped_without_container() {
        let agent = agent();
        assert_eq!(agent.status(), AgentStatus::Stopped);
        assert!(agent.container().is_none());
        assert!(agent.is_active);
    }

    #[test]
    fn test_running_and_container_move_together() {
        let mut agent = agent();
        agent.mark_running(ContainerHandle::new("abc123"));
        assert!(agent.is_running());
        assert_eq!(agent.container().map(|h| h.as_str()), Some("abc123"));

        agent.mark_stopped();
        assert_eq!(agent.status(), AgentStatus::Stopped);
        assert!(agent.container().is_none());
    }

    #[test]
    fn test_error_clears_container_and_records_reason() {
        let mut agent = agent();
        agent.mark_running(ContainerHandle::new("abc123"));
        agent.mark_error("engine unreachable");
        assert_eq!(agent.status(), AgentStatus::Error);
        assert!(agent.container().is_none());
        assert_eq!(agent.last_error(), Some("engine unreachable"));
    }

    #[test]
    fn test_env_vars_export_scalars_only() {
        let mut agent = agent();
        agent.config.insert("poll_seconds".into(), serde_json::json!(30));
        agent.config.insert("verbose".into(), serde_json::json!(true));
        agent.config.insert("nested".into(), serde_json::json!({"a": 1}));

        let vars = agent.env_vars();
        assert!(vars.contains(&"POLL_SECONDS=30".to_string()));
        assert!(vars.contains(&"VERBOSE=true".to_string()));
        assert!(!vars.iter().any(|v| v.starts_with("NESTED=")));
        assert!(vars.contains(&format!("AUTOMA_AGENT_ID={}", agent.id)));
    }

    #[test]
    fn test_status_roundtrips_through_str() {
        for status in [AgentStatus::Stopped, AgentStatus::Running, AgentStatus::Error] {
            assert_eq!(status.as_str().parse::<AgentStatus>(), Ok(status));
        }
        assert!("paused".parse::<AgentStatus>().is_err());
    }
}
