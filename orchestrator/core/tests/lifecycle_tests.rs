// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

mod common;

use std::time::Duration;

use automa_core::application::lifecycle::{LifecycleError, NewAgent};
use automa_core::application::sandbox::{agent_container_name, MANAGED_LABEL};
use automa_core::application::Actor;
use automa_core::domain::agent::{AgentStatus, UserId};
use automa_core::domain::runtime::ContainerEngine;
use automa_core::domain::schedule::ScheduleKind;

use common::Harness;

#[tokio::test]
async fn test_start_agent_launches_container_and_marks_running() {
    let h = Harness::new();
    let agent = h.agent("collector").await;

    let started = h
        .host
        .agents
        .start_agent(agent.id, Actor::User(h.owner))
        .await
        .unwrap();

    assert_eq!(started.status(), AgentStatus::Running);
    let handle = started.container().cloned().unwrap();
    let container = h.engine.container(&handle).unwrap();
    assert!(container.running);
    assert_eq!(container.name, agent_container_name(agent.id));

    let stored = h.repos().agents.find_by_id(agent.id).await.unwrap().unwrap();
    assert_eq!(stored.status(), AgentStatus::Running);
    assert_eq!(stored.container(), Some(&handle));
    assert!(h.audit.actions().contains(&"agent.start".to_string()));
}

#[tokio::test]
async fn test_concurrent_starts_launch_one_container() {
    let h = Harness::new();
    let agent = h.agent("collector").await;
    let actor = Actor::User(h.owner);

    let (a, b) = tokio::join!(
        h.host.agents.start_agent(agent.id, actor),
        h.host.agents.start_agent(agent.id, actor),
    );

    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(h.engine.runs().len(), 1);
    assert_eq!(a.container(), b.container());
    assert_eq!(h.engine.running_count(), 1);
}

#[tokio::test]
async fn test_start_is_idempotent_while_running() {
    let h = Harness::new();
    let agent = h.agent("collector").await;
    let actor = Actor::User(h.owner);

    let first = h.host.agents.start_agent(agent.id, actor).await.unwrap();
    let second = h.host.agents.start_agent(agent.id, actor).await.unwrap();

    assert_eq!(first.container(), second.container());
    assert_eq!(h.engine.runs().len(), 1);
}

#[tokio::test]
async fn test_stop_twice_stops_container_once() {
    let h = Harness::new();
    let agent = h.agent("collector").await;
    let actor = Actor::User(h.owner);
    h.host.agents.start_agent(agent.id, actor).await.unwrap();

    let stopped = h.host.agents.stop_agent(agent.id, actor).await.unwrap();
    assert_eq!(stopped.status(), AgentStatus::Stopped);
    assert!(stopped.container().is_none());

    let again = h.host.agents.stop_agent(agent.id, actor).await.unwrap();
    assert_eq!(again.status(), AgentStatus::Stopped);

    assert_eq!(h.engine.stops().len(), 1);
    assert!(h.engine.containers().is_empty());
}

#[tokio::test]
async fn test_stop_marks_stopped_when_container_vanished() {
    let h = Harness::new();
    let agent = h.agent("collector").await;
    let actor = Actor::User(h.owner);
    let started = h.host.agents.start_agent(agent.id, actor).await.unwrap();
    let handle = started.container().cloned().unwrap();

    // Removed behind the core's back.
    h.engine.remove(&handle, true).await.unwrap();

    let stopped = h.host.agents.stop_agent(agent.id, actor).await.unwrap();
    assert_eq!(stopped.status(), AgentStatus::Stopped);
}

#[tokio::test]
async fn test_start_failure_marks_error_and_audits() {
    let h = Harness::new();
    let agent = h.agent_with("broken", Some(h.missing_script())).await;

    let err = h
        .host
        .agents
        .start_agent(agent.id, Actor::User(h.owner))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Sandbox(_)));

    let stored = h.repos().agents.find_by_id(agent.id).await.unwrap().unwrap();
    assert_eq!(stored.status(), AgentStatus::Error);
    assert!(stored.container().is_none());
    assert!(stored.last_error().unwrap().contains("not found"));
    assert!(h.audit.actions().contains(&"agent.start_failed".to_string()));
    assert!(h.engine.runs().is_empty());
}

#[tokio::test]
async fn test_start_without_script_is_rejected() {
    let h = Harness::new();
    let agent = h.agent_with("empty", None).await;

    let err = h
        .host
        .agents
        .start_agent(agent.id, Actor::User(h.owner))
        .await
        .unwrap_err();

    assert!(matches!(err, LifecycleError::NoScript(id) if id == agent.id));
    assert!(h.engine.runs().is_empty());
}

#[tokio::test]
async fn test_error_agent_can_be_stopped_then_started() {
    let h = Harness::new();
    let script = h.script("late.py");
    let path = script.file_path.clone();
    std::fs::remove_file(&path).unwrap();
    let agent = h.agent_with("late", Some(script)).await;
    let actor = Actor::User(h.owner);

    assert!(h.host.agents.start_agent(agent.id, actor).await.is_err());
    let stopped = h.host.agents.stop_agent(agent.id, actor).await.unwrap();
    assert_eq!(stopped.status(), AgentStatus::Stopped);

    std::fs::write(&path, "print('ok')\n").unwrap();
    let started = h.host.agents.start_agent(agent.id, actor).await.unwrap();
    assert_eq!(started.status(), AgentStatus::Running);
    assert!(started.last_error().is_none());
}

#[tokio::test]
async fn test_restart_replaces_container() {
    let h = Harness::new();
    let agent = h.agent("collector").await;
    let actor = Actor::User(h.owner);
    let first = h.host.agents.start_agent(agent.id, actor).await.unwrap();

    let restarted = h.host.agents.restart_agent(agent.id, actor).await.unwrap();

    assert_eq!(restarted.status(), AgentStatus::Running);
    assert_ne!(restarted.container(), first.container());
    assert_eq!(h.engine.runs().len(), 2);
    assert_eq!(h.engine.running_count(), 1);
    assert!(h.audit.actions().contains(&"agent.restart".to_string()));
}

#[tokio::test]
async fn test_start_clears_leftover_container_with_agent_name() {
    let h = Harness::new();
    let agent = h.agent("collector").await;
    let name = agent_container_name(agent.id);
    h.engine
        .insert_container(&name, &[(MANAGED_LABEL, "true")], true);

    let started = h
        .host
        .agents
        .start_agent(agent.id, Actor::User(h.owner))
        .await
        .unwrap();

    assert_eq!(started.status(), AgentStatus::Running);
    assert_eq!(h.engine.runs().len(), 1);
    assert_eq!(h.engine.containers().len(), 1);
}

#[tokio::test]
async fn test_other_users_cannot_see_or_control_agent() {
    let h = Harness::new();
    let agent = h.agent("private").await;
    let stranger = Actor::User(UserId::new());

    assert!(matches!(
        h.host.agents.start_agent(agent.id, stranger).await,
        Err(LifecycleError::NotFound(_))
    ));
    assert!(matches!(
        h.host.agents.get_agent(agent.id, stranger).await,
        Err(LifecycleError::NotFound(_))
    ));
    assert!(h.engine.runs().is_empty());

    // System callers are not owner-scoped.
    assert!(h.host.agents.get_agent(agent.id, Actor::System).await.is_ok());
}

#[tokio::test]
async fn test_create_agent_rejects_blank_name() {
    let h = Harness::new();

    let err = h
        .host
        .agents
        .create_agent(
            NewAgent {
                name: "   ".into(),
                ..Default::default()
            },
            h.owner,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, LifecycleError::Validation(_)));
}

#[tokio::test]
async fn test_list_agents_filters_by_status() {
    let h = Harness::new();
    let running = h.agent("running").await;
    h.agent("idle").await;
    h.host
        .agents
        .start_agent(running.id, Actor::User(h.owner))
        .await
        .unwrap();

    let all = h.host.agents.list_agents(h.owner, None).await.unwrap();
    let only_running = h
        .host
        .agents
        .list_agents(h.owner, Some(AgentStatus::Running))
        .await
        .unwrap();

    assert_eq!(all.len(), 2);
    assert_eq!(only_running.len(), 1);
    assert_eq!(only_running[0].id, running.id);
}

#[tokio::test]
async fn test_delete_agent_stops_container_and_unschedules_jobs() {
    let h = Harness::new();
    let agent = h.agent("collector").await;
    let actor = Actor::User(h.owner);
    h.host.agents.start_agent(agent.id, actor).await.unwrap();
    let interval = h.job(&agent, |_| {}).await;
    let once = h
        .job(&agent, |j| {
            j.name = "once".into();
            j.schedule_type = ScheduleKind::Once;
        })
        .await;
    assert!(h.host.scheduler.is_scheduled(interval.id));

    h.host.agents.delete_agent(agent.id, actor).await.unwrap();

    assert!(!h.host.scheduler.is_scheduled(interval.id));
    assert!(!h.host.scheduler.is_scheduled(once.id));
    assert_eq!(h.engine.running_count(), 0);

    let stored = h.repos().jobs.find_by_id(interval.id).await.unwrap().unwrap();
    assert!(stored.is_deleted());
    assert!(matches!(
        h.host.agents.get_agent(agent.id, actor).await,
        Err(LifecycleError::NotFound(_))
    ));
    assert!(h.audit.actions().contains(&"agent.delete".to_string()));
}

#[tokio::test]
async fn test_stop_after_container_exited_cleans_up() {
    let h = Harness::new();
    let agent = h.agent("collector").await;
    let actor = Actor::User(h.owner);
    let started = h.host.agents.start_agent(agent.id, actor).await.unwrap();
    let handle = started.container().cloned().unwrap();

    // Stopping the container directly leaves the agent record running until
    // the lifecycle service stops it.
    h.engine.stop(&handle, Duration::from_secs(1)).await.unwrap();
    let stored = h.repos().agents.find_by_id(agent.id).await.unwrap().unwrap();
    assert_eq!(stored.status(), AgentStatus::Running);

    h.host.agents.stop_agent(agent.id, actor).await.unwrap();
    assert!(h.engine.containers().is_empty());
}
