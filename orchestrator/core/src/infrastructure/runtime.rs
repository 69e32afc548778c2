// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Docker implementation of [`ContainerEngine`] over `bollard`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerCreateBody, HostConfig, RestartPolicyNameEnum};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, InspectContainerOptions, ListContainersOptionsBuilder,
    LogsOptionsBuilder, RemoveContainerOptionsBuilder, StartContainerOptions,
    StopContainerOptionsBuilder, WaitContainerOptionsBuilder,
};
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::StreamExt;
use tracing::{debug, info};

use crate::domain::runtime::{
    ContainerEngine, ContainerHandle, ContainerSpec, ContainerSummary, ExitInfo, NetworkPolicy,
    RestartPolicy, RuntimeError,
};

const DOCKER_CLIENT_TIMEOUT_SECS: u64 = 120;

pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect to the daemon at `socket_path`, or auto-detect when `None`.
    pub fn new(socket_path: Option<&str>) -> Result<Self, RuntimeError> {
        let docker = if let Some(path) = socket_path {
            Docker::connect_with_socket(path, DOCKER_CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)
                .map_err(|e| {
                    RuntimeError::Unavailable(format!(
                        "Failed to connect to Docker at {}: {}\n\n\
                         Ensure Docker is running and the socket path is correct.",
                        path, e
                    ))
                })?
        } else {
            Docker::connect_with_local_defaults().map_err(|e| {
                RuntimeError::Unavailable(format!(
                    "Failed to connect to Docker: {}\n\n\
                     Common causes:\n\
                     - Docker daemon not running (check: docker ps)\n\
                     - Permission denied accessing Docker socket\n\
                     - Current user not in 'docker' group",
                    e
                ))
            })?
        };

        Ok(Self { docker })
    }
}

fn map_err(err: BollardError) -> RuntimeError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::NotFound(message),
        BollardError::DockerResponseServerError {
            status_code: 409,
            message,
        } => RuntimeError::Conflict(message),
        BollardError::IOError { .. } | BollardError::RequestTimeoutError => {
            RuntimeError::Unavailable(err.to_string())
        }
        other => RuntimeError::Engine(other.to_string()),
    }
}

fn summary_from_names(
    id: Option<String>,
    names: Option<Vec<String>>,
    labels: Option<HashMap<String, String>>,
    running: bool,
) -> Option<ContainerSummary> {
    let id = id?;
    // Docker reports names with a leading slash.
    let name = names
        .and_then(|n| n.into_iter().next())
        .map(|n| n.trim_start_matches('/').to_string());
    Some(ContainerSummary {
        handle: ContainerHandle::new(id),
        name,
        running,
        labels: labels.unwrap_or_default(),
    })
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker.ping().await.map_err(|e| {
            RuntimeError::Unavailable(format!(
                "Cannot connect to Docker daemon: {}\n\nVerify with: docker ps",
                e
            ))
        })?;
        Ok(())
    }

    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
        let (network_disabled, network_mode) = match &spec.network {
            NetworkPolicy::Disabled => (Some(true), Some("none".to_string())),
            NetworkPolicy::Enabled(network) => (None, network.clone()),
        };
        let restart_name = match spec.restart {
            RestartPolicy::Never => RestartPolicyNameEnum::NO,
            RestartPolicy::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
        };

        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            env: (!spec.env.is_empty()).then(|| spec.env.clone()),
            user: spec.user.clone(),
            labels: Some(spec.labels.clone()),
            network_disabled,
            host_config: Some(HostConfig {
                binds: Some(spec.mounts.iter().map(|m| m.to_bind_string()).collect()),
                memory: spec.limits.memory_bytes,
                nano_cpus: spec.limits.nano_cpus,
                cpuset_cpus: spec.limits.cpuset_cpus.clone(),
                network_mode,
                restart_policy: Some(bollard::models::RestartPolicy {
                    name: Some(restart_name),
                    maximum_retry_count: None,
                }),
                ..HostConfig::default()
            }),
            ..ContainerCreateBody::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptionsBuilder::new().name(&spec.name).build()),
                body,
            )
            .await
            .map_err(map_err)?;

        if let Err(e) = self
            .docker
            .start_container(&created.id, None::<StartContainerOptions>)
            .await
        {
            // Do not leave a created-but-never-started container behind.
            let _ = self
                .docker
                .remove_container(
                    &created.id,
                    Some(RemoveContainerOptionsBuilder::new().force(true).build()),
                )
                .await;
            return Err(map_err(e));
        }

        info!(container = %created.id, name = %spec.name, image = %spec.image, "Started container");
        Ok(ContainerHandle::new(created.id))
    }

    async fn wait(
        &self,
        handle: &ContainerHandle,
        timeout: Duration,
    ) -> Result<ExitInfo, RuntimeError> {
        let mut stream = self.docker.wait_container(
            handle.as_str(),
            Some(
                WaitContainerOptionsBuilder::new()
                    .condition("not-running")
                    .build(),
            ),
        );

        let next = tokio::time::timeout(timeout, stream.next())
            .await
            .map_err(|_| RuntimeError::Timeout(timeout))?;

        match next {
            Some(Ok(response)) => Ok(ExitInfo {
                status_code: response.status_code,
            }),
            // bollard surfaces non-zero exits as an error carrying the code.
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => {
                Ok(ExitInfo { status_code: code })
            }
            Some(Err(e)) => Err(map_err(e)),
            None => Err(RuntimeError::Engine(format!(
                "wait stream for {} ended without a status",
                handle
            ))),
        }
    }

    async fn logs(&self, handle: &ContainerHandle) -> Result<String, RuntimeError> {
        let mut stream = self.docker.logs(
            handle.as_str(),
            Some(LogsOptionsBuilder::new().stdout(true).stderr(true).build()),
        );

        let mut output = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk.map_err(map_err)? {
                LogOutput::StdOut { message }
                | LogOutput::StdErr { message }
                | LogOutput::Console { message } => {
                    output.push_str(&String::from_utf8_lossy(&message));
                }
                LogOutput::StdIn { .. } => {}
            }
        }
        Ok(output)
    }

    async fn stop(&self, handle: &ContainerHandle, timeout: Duration) -> Result<(), RuntimeError> {
        self.docker
            .stop_container(
                handle.as_str(),
                Some(
                    StopContainerOptionsBuilder::new()
                        .t(timeout.as_secs().min(i32::MAX as u64) as i32)
                        .build(),
                ),
            )
            .await
            .map_err(map_err)?;
        debug!(container = %handle, "Stopped container");
        Ok(())
    }

    async fn remove(&self, handle: &ContainerHandle, force: bool) -> Result<(), RuntimeError> {
        self.docker
            .remove_container(
                handle.as_str(),
                Some(RemoveContainerOptionsBuilder::new().force(force).build()),
            )
            .await
            .map_err(map_err)?;
        debug!(container = %handle, "Removed container");
        Ok(())
    }

    async fn list(&self, label: &str) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let filters: HashMap<&str, Vec<&str>> = HashMap::from([("label", vec![label])]);
        let containers = self
            .docker
            .list_containers(Some(
                ListContainersOptionsBuilder::new()
                    .all(true)
                    .filters(&filters)
                    .build(),
            ))
            .await
            .map_err(map_err)?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let running = c
                    .state
                    .as_ref()
                    .map(|s| s.to_string() == "running")
                    .unwrap_or(false);
                summary_from_names(c.id, c.names, c.labels, running)
            })
            .collect())
    }

    async fn inspect(
        &self,
        handle: &ContainerHandle,
    ) -> Result<Option<ContainerSummary>, RuntimeError> {
        match self
            .docker
            .inspect_container(handle.as_str(), None::<InspectContainerOptions>)
            .await
        {
            Ok(details) => {
                let running = details
                    .state
                    .as_ref()
                    .and_then(|s| s.running)
                    .unwrap_or(false);
                Ok(summary_from_names(
                    details.id,
                    details.name.map(|n| vec![n]),
                    details.config.and_then(|c| c.labels),
                    running,
                ))
            }
            Err(e) => match map_err(e) {
                RuntimeError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping_by_status() {
        let not_found = BollardError::DockerResponseServerError {
            status_code: 404,
            message: "No such container".into(),
        };
        assert!(matches!(map_err(not_found), RuntimeError::NotFound(_)));

        let conflict = BollardError::DockerResponseServerError {
            status_code: 409,
            message: "name in use".into(),
        };
        assert!(matches!(map_err(conflict), RuntimeError::Conflict(_)));

        let server = BollardError::DockerResponseServerError {
            status_code: 500,
            message: "boom".into(),
        };
        assert!(matches!(map_err(server), RuntimeError::Engine(_)));
    }

    #[test]
    fn test_summary_strips_leading_slash() {
        let summary = summary_from_names(
            Some("abc123".into()),
            Some(vec!["/automa-agent-1".into()]),
            Some(HashMap::from([("automa.kind".to_string(), "agent".to_string())])),
            true,
        )
        .unwrap();
        assert_eq!(summary.name.as_deref(), Some("automa-agent-1"));
        assert_eq!(summary.label("automa.kind"), Some("agent"));
        assert!(summary.running);
        assert!(summary_from_names(None, None, None, false).is_none());
    }
}
