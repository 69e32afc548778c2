// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

mod common;

use std::time::Duration;

use automa_core::application::sandbox::{
    agent_container_name, SandboxError, AGENT_LABEL, KIND_LABEL, MANAGED_LABEL,
};
use automa_core::domain::agent::AgentId;
use automa_core::domain::runtime::{
    ContainerHandle, NetworkPolicy, RestartPolicy, SandboxStatus,
};

use common::Harness;

#[tokio::test]
async fn test_execute_success_collects_output_and_removes_container() {
    let h = Harness::new();
    let script = h.script("hello.py");

    let result = h.host.sandbox.execute(&script).await;

    assert_eq!(result.status, SandboxStatus::Success);
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.output, "hello from sandbox\n");
    assert!(result.error.is_none());

    let runs = h.engine.runs();
    assert_eq!(runs.len(), 1);
    let spec = &runs[0];
    assert!(spec.name.starts_with(&format!("automa-script-{}-", script.id)));
    assert_eq!(spec.network, NetworkPolicy::Disabled);
    assert_eq!(spec.restart, RestartPolicy::Never);
    assert_eq!(spec.mounts.len(), 1);
    assert!(spec.mounts[0].read_only);
    assert_eq!(spec.mounts[0].host_path, script.file_path);
    assert_eq!(spec.limits.memory_bytes, Some(256 * 1024 * 1024));
    assert_eq!(spec.limits.nano_cpus, Some(500_000_000));
    assert!(spec.user.is_some());
    assert_eq!(spec.labels.get(MANAGED_LABEL).map(String::as_str), Some("true"));
    assert_eq!(spec.labels.get(KIND_LABEL).map(String::as_str), Some("job"));

    assert!(h.engine.containers().is_empty());
    assert_eq!(h.engine.removes().len(), 1);
}

#[tokio::test]
async fn test_nonzero_exit_is_failed_with_code() {
    let h = Harness::new();
    h.engine.set_exit_code(2);
    h.engine.set_logs("Traceback: boom\n");

    let result = h.host.sandbox.execute(&h.script("crash.py")).await;

    assert_eq!(result.status, SandboxStatus::Failed);
    assert_eq!(result.exit_code, Some(2));
    assert_eq!(result.error.as_deref(), Some("Traceback: boom\n"));
    assert!(h.engine.containers().is_empty());
}

#[tokio::test]
async fn test_timeout_keeps_partial_output_and_kills_container() {
    let h = Harness::new();
    h.engine.set_hang(true);
    h.engine.set_logs("tick 1\n");

    let result = h.host.sandbox.execute(&h.script("loop.py")).await;

    assert_eq!(result.status, SandboxStatus::Timeout);
    assert_eq!(result.exit_code, None);
    assert_eq!(result.output, "tick 1\n");
    assert!(result.error.unwrap().contains("timed out"));

    assert!(h.engine.containers().is_empty());
    let removes = h.engine.removes();
    assert_eq!(removes.len(), 1);
    assert!(removes[0].1, "timed out container must be force-removed");
}

#[tokio::test]
async fn test_missing_script_is_error_without_launch() {
    let h = Harness::new();

    let result = h.host.sandbox.execute(&h.missing_script()).await;

    assert_eq!(result.status, SandboxStatus::Error);
    assert_eq!(result.exit_code, Some(-1));
    assert!(result.error.unwrap().contains("not found"));
    assert!(h.engine.runs().is_empty());
}

#[tokio::test]
async fn test_transient_launch_failures_are_retried() {
    let h = Harness::new();
    h.engine.fail_next_runs(2);

    let result = h.host.sandbox.execute(&h.script("flaky.py")).await;

    assert_eq!(result.status, SandboxStatus::Success);
    assert_eq!(h.engine.runs().len(), 3);
}

#[tokio::test]
async fn test_launch_gives_up_after_retry_budget() {
    let h = Harness::new();
    h.engine.fail_next_runs(10);

    let result = h.host.sandbox.execute(&h.script("flaky.py")).await;

    assert_eq!(result.status, SandboxStatus::Error);
    assert_eq!(h.engine.runs().len(), 3);
}

#[tokio::test]
async fn test_start_detached_uses_agent_name_network_and_restart_policy() {
    let h = Harness::new();
    let agent_id = AgentId::new();
    let env = vec!["POLL_SECONDS=30".to_string()];

    let handle = h
        .host
        .sandbox
        .start_detached(&h.script("agent.py"), agent_id, env.clone())
        .await
        .unwrap();

    let container = h.engine.container(&handle).unwrap();
    assert!(container.running);
    assert_eq!(container.name, agent_container_name(agent_id));

    let spec = &h.engine.runs()[0];
    assert_eq!(spec.network, NetworkPolicy::Enabled(None));
    assert_eq!(spec.restart, RestartPolicy::UnlessStopped);
    assert_eq!(spec.env, env);
    assert_eq!(spec.labels.get(KIND_LABEL).map(String::as_str), Some("agent"));
    assert_eq!(
        spec.labels.get(AGENT_LABEL).cloned(),
        Some(agent_id.to_string())
    );
}

#[tokio::test]
async fn test_start_detached_replaces_stale_named_container() {
    let h = Harness::new();
    let agent_id = AgentId::new();
    let name = agent_container_name(agent_id);
    h.engine
        .insert_container(&name, &[(MANAGED_LABEL, "true")], true);

    let handle = h
        .host
        .sandbox
        .start_detached(&h.script("agent.py"), agent_id, Vec::new())
        .await
        .unwrap();

    let containers = h.engine.containers();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].id, handle.as_str());
    assert!(h.engine.removes().contains(&(name, true)));
}

#[tokio::test]
async fn test_start_detached_rejects_missing_script() {
    let h = Harness::new();

    let err = h
        .host
        .sandbox
        .start_detached(&h.missing_script(), AgentId::new(), Vec::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SandboxError::ScriptMissing(_)));
    assert!(h.engine.runs().is_empty());
}

#[tokio::test]
async fn test_stop_detached_removes_and_tolerates_unknown() {
    let h = Harness::new();
    let handle = h
        .host
        .sandbox
        .start_detached(&h.script("agent.py"), AgentId::new(), Vec::new())
        .await
        .unwrap();

    h.host
        .sandbox
        .stop_detached(&handle, Duration::from_secs(1))
        .await
        .unwrap();
    assert!(h.engine.containers().is_empty());
    assert_eq!(h.engine.stops(), vec![handle.to_string()]);

    h.host
        .sandbox
        .stop_detached(&ContainerHandle::new("ghost"), Duration::from_secs(1))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_list_managed_filters_on_label() {
    let h = Harness::new();
    h.engine
        .insert_container("managed", &[(MANAGED_LABEL, "true")], true);
    h.engine.insert_container("postgres", &[], true);

    let managed = h.host.sandbox.list_managed().await.unwrap();

    assert_eq!(managed.len(), 1);
    assert_eq!(managed[0].name.as_deref(), Some("managed"));
}
