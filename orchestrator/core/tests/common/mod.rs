// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Shared fixtures: an in-process container engine, a recording audit sink,
//! and a harness wiring a full `ServiceHost` over in-memory storage.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use automa_core::application::lifecycle::NewAgent;
use automa_core::application::repository_factory::Repositories;
use automa_core::application::ServiceHost;
use automa_core::domain::agent::{Agent, ScriptRef, UserId};
use automa_core::domain::audit::{AuditEntry, AuditSink};
use automa_core::domain::job::{Job, NewJob};
use automa_core::domain::node_config::NodeConfigManifest;
use automa_core::domain::runtime::{
    ContainerEngine, ContainerHandle, ContainerSpec, ContainerSummary, ExitInfo, RuntimeError,
};
use automa_core::domain::schedule::ScheduleKind;

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
    pub running: bool,
}

#[derive(Default)]
struct EngineState {
    containers: Vec<FakeContainer>,
    runs: Vec<ContainerSpec>,
    stops: Vec<String>,
    removes: Vec<(String, bool)>,
    exit_code: i64,
    logs: String,
    hang: bool,
    transient_run_failures: u32,
    unavailable: bool,
}

impl EngineState {
    fn find(&self, handle: &ContainerHandle) -> Option<usize> {
        self.containers
            .iter()
            .position(|c| c.id == handle.as_str() || c.name == handle.as_str())
    }
}

/// Container engine double. Containers live in a vector; every call is
/// recorded. Waits can be held open with [`FakeEngine::hold_waits`].
pub struct FakeEngine {
    state: Mutex<EngineState>,
    next_id: AtomicU64,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EngineState {
                logs: "hello from sandbox\n".to_string(),
                ..Default::default()
            }),
            next_id: AtomicU64::new(1),
            gate: Mutex::new(None),
        }
    }

    pub fn set_exit_code(&self, code: i64) {
        self.state.lock().exit_code = code;
    }

    pub fn set_logs(&self, logs: &str) {
        self.state.lock().logs = logs.to_string();
    }

    /// Every wait reports a timeout, as a script that never exits would.
    pub fn set_hang(&self, hang: bool) {
        self.state.lock().hang = hang;
    }

    pub fn fail_next_runs(&self, count: u32) {
        self.state.lock().transient_run_failures = count;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Block every subsequent wait until permits are added to the returned
    /// semaphore.
    pub fn hold_waits(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    /// Seed a container the engine already knows about.
    pub fn insert_container(
        &self,
        name: &str,
        labels: &[(&str, &str)],
        running: bool,
    ) -> ContainerHandle {
        let id = format!("seed{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.state.lock().containers.push(FakeContainer {
            id: id.clone(),
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            running,
        });
        ContainerHandle::new(id)
    }

    pub fn containers(&self) -> Vec<FakeContainer> {
        self.state.lock().containers.clone()
    }

    pub fn container(&self, handle: &ContainerHandle) -> Option<FakeContainer> {
        let state = self.state.lock();
        state.find(handle).map(|i| state.containers[i].clone())
    }

    pub fn running_count(&self) -> usize {
        self.state.lock().containers.iter().filter(|c| c.running).count()
    }

    pub fn runs(&self) -> Vec<ContainerSpec> {
        self.state.lock().runs.clone()
    }

    pub fn stops(&self) -> Vec<String> {
        self.state.lock().stops.clone()
    }

    pub fn removes(&self) -> Vec<(String, bool)> {
        self.state.lock().removes.clone()
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn ping(&self) -> Result<(), RuntimeError> {
        if self.state.lock().unavailable {
            return Err(RuntimeError::Unavailable("fake engine offline".into()));
        }
        Ok(())
    }

    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
        // Let concurrent callers interleave.
        tokio::task::yield_now().await;

        let mut state = self.state.lock();
        state.runs.push(spec.clone());
        if state.transient_run_failures > 0 {
            state.transient_run_failures -= 1;
            return Err(RuntimeError::Unavailable("connection reset".into()));
        }
        if state.containers.iter().any(|c| c.name == spec.name) {
            return Err(RuntimeError::Conflict(format!(
                "name {} already in use",
                spec.name
            )));
        }
        let id = format!("c{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        state.containers.push(FakeContainer {
            id: id.clone(),
            name: spec.name.clone(),
            labels: spec.labels.clone(),
            running: true,
        });
        Ok(ContainerHandle::new(id))
    }

    async fn wait(
        &self,
        handle: &ContainerHandle,
        timeout: Duration,
    ) -> Result<ExitInfo, RuntimeError> {
        if self.state.lock().find(handle).is_none() {
            return Err(RuntimeError::NotFound(handle.to_string()));
        }
        if self.state.lock().hang {
            return Err(RuntimeError::Timeout(timeout));
        }

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let mut state = self.state.lock();
        let code = state.exit_code;
        match state.find(handle) {
            Some(i) => {
                state.containers[i].running = false;
                Ok(ExitInfo { status_code: code })
            }
            None => Err(RuntimeError::NotFound(handle.to_string())),
        }
    }

    async fn logs(&self, handle: &ContainerHandle) -> Result<String, RuntimeError> {
        let state = self.state.lock();
        state
            .find(handle)
            .map(|_| state.logs.clone())
            .ok_or_else(|| RuntimeError::NotFound(handle.to_string()))
    }

    async fn stop(&self, handle: &ContainerHandle, _timeout: Duration) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        let i = state
            .find(handle)
            .ok_or_else(|| RuntimeError::NotFound(handle.to_string()))?;
        state.containers[i].running = false;
        state.stops.push(handle.to_string());
        Ok(())
    }

    async fn remove(&self, handle: &ContainerHandle, force: bool) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        let i = state
            .find(handle)
            .ok_or_else(|| RuntimeError::NotFound(handle.to_string()))?;
        if state.containers[i].running && !force {
            return Err(RuntimeError::Conflict(format!(
                "container {} is running",
                handle
            )));
        }
        state.containers.remove(i);
        state.removes.push((handle.to_string(), force));
        Ok(())
    }

    async fn list(&self, label: &str) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let state = self.state.lock();
        if state.unavailable {
            return Err(RuntimeError::Unavailable("fake engine offline".into()));
        }
        let (key, value) = label.split_once('=').unwrap_or((label, ""));
        Ok(state
            .containers
            .iter()
            .filter(|c| {
                c.labels
                    .get(key)
                    .is_some_and(|v| value.is_empty() || v == value)
            })
            .map(|c| ContainerSummary {
                handle: ContainerHandle::new(c.id.clone()),
                name: Some(c.name.clone()),
                running: c.running,
                labels: c.labels.clone(),
            })
            .collect())
    }

    async fn inspect(
        &self,
        handle: &ContainerHandle,
    ) -> Result<Option<ContainerSummary>, RuntimeError> {
        let state = self.state.lock();
        if state.unavailable {
            return Err(RuntimeError::Unavailable("fake engine offline".into()));
        }
        Ok(state.find(handle).map(|i| {
            let c = &state.containers[i];
            ContainerSummary {
                handle: ContainerHandle::new(c.id.clone()),
                name: Some(c.name.clone()),
                running: c.running,
                labels: c.labels.clone(),
            }
        }))
    }
}

#[derive(Default)]
pub struct RecordingAudit {
    entries: Mutex<Vec<AuditEntry>>,
}

impl RecordingAudit {
    pub fn actions(&self) -> Vec<String> {
        self.entries.lock().iter().map(|e| e.action.clone()).collect()
    }
}

impl AuditSink for RecordingAudit {
    fn record(&self, entry: AuditEntry) {
        self.entries.lock().push(entry);
    }
}

/// Defaults tuned for tests: no backoff, no periodic sweeper, and a tick
/// loop slow enough that tests drive `fire_due` themselves.
pub fn test_config() -> NodeConfigManifest {
    let mut config = NodeConfigManifest::default();
    config.spec.retry.base_delay_ms = 1;
    config.spec.maintenance.orphan_sweep_interval_seconds = 0;
    config.spec.scheduler.tick_interval_ms = 3_600_000;
    config.spec.scheduler.drain_timeout_seconds = 5;
    config.spec.sandbox.timeout_seconds = 2;
    config
}

pub struct Harness {
    pub engine: Arc<FakeEngine>,
    pub audit: Arc<RecordingAudit>,
    pub host: ServiceHost,
    pub owner: UserId,
    scripts: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: NodeConfigManifest) -> Self {
        let engine = Arc::new(FakeEngine::new());
        let audit = Arc::new(RecordingAudit::default());
        let host = ServiceHost::new(
            &config,
            Repositories::in_memory(),
            engine.clone(),
            audit.clone(),
        )
        .expect("test config is valid");
        Self {
            engine,
            audit,
            host,
            owner: UserId::new(),
            scripts: tempfile::tempdir().expect("temp dir"),
        }
    }

    pub fn repos(&self) -> &Repositories {
        &self.host.repositories
    }

    /// Write a script file and return a reference to it.
    pub fn script(&self, name: &str) -> ScriptRef {
        let path: PathBuf = self.scripts.path().join(name);
        std::fs::write(&path, "print('hello')\n").expect("write script");
        ScriptRef::new(path)
    }

    pub fn missing_script(&self) -> ScriptRef {
        ScriptRef::new(self.scripts.path().join("does-not-exist.py"))
    }

    pub async fn agent_with(&self, name: &str, script: Option<ScriptRef>) -> Agent {
        self.host
            .agents
            .create_agent(
                NewAgent {
                    name: name.to_string(),
                    script,
                    ..Default::default()
                },
                self.owner,
            )
            .await
            .expect("create agent")
    }

    pub async fn agent(&self, name: &str) -> Agent {
        let script = self.script(&format!("{name}.py"));
        self.agent_with(name, Some(script)).await
    }

    pub async fn job(&self, agent: &Agent, draft: impl FnOnce(&mut NewJob)) -> Job {
        let mut new_job = NewJob {
            agent_id: agent.id,
            name: "job".to_string(),
            schedule_type: ScheduleKind::Interval,
            cron_expression: None,
            interval_seconds: Some(60),
            run_at: None,
            is_active: true,
        };
        draft(&mut new_job);
        self.host
            .jobs
            .create_job(new_job, self.owner)
            .await
            .expect("create job")
    }
}

/// Poll `check` until it returns true or two seconds pass.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
