// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-process service wiring shared by the daemon and one-shot commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use automa_core::application::repository_factory::{create_repositories, storage_backend};
use automa_core::application::ServiceHost;
use automa_core::domain::audit::AuditSink;
use automa_core::domain::node_config::{LoggingConfig, NodeConfigManifest};
use automa_core::infrastructure::{DockerEngine, PostgresAuditSink, TracingAuditSink};

pub fn load_config(config_path: Option<PathBuf>) -> Result<NodeConfigManifest> {
    let config =
        NodeConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;
    Ok(config)
}

/// Level and format for the subscriber. Flags (or their env vars) win over
/// `observability.logging` from the config file.
pub fn resolve_logging(
    level: Option<&str>,
    format: Option<&str>,
    file: Option<&LoggingConfig>,
) -> (String, String) {
    let defaults = LoggingConfig::default();
    let file = file.unwrap_or(&defaults);
    (
        level.unwrap_or(&file.level).to_string(),
        format.unwrap_or(&file.format).to_string(),
    )
}

/// Connect storage and the container engine, and wire every service.
/// Audit entries go to `audit_log` when PostgreSQL is configured, to the log
/// otherwise.
pub async fn build_host(config: &NodeConfigManifest) -> Result<ServiceHost> {
    let repositories = create_repositories(&storage_backend(&config.spec.database)).await?;

    let engine = DockerEngine::new(config.spec.sandbox.docker_socket.as_deref())
        .context("Failed to initialize Docker engine")?;

    let audit: Arc<dyn AuditSink> = match &repositories.pool {
        Some(pool) => Arc::new(PostgresAuditSink::new(pool.clone())),
        None => Arc::new(TracingAuditSink),
    };

    ServiceHost::new(config, repositories, Arc::new(engine), audit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_logging_applies_without_flags() {
        let file = LoggingConfig {
            level: "debug".into(),
            format: "json".into(),
        };
        assert_eq!(
            resolve_logging(None, None, Some(&file)),
            ("debug".to_string(), "json".to_string())
        );
    }

    #[test]
    fn test_flags_override_config_logging() {
        let file = LoggingConfig {
            level: "debug".into(),
            format: "json".into(),
        };
        assert_eq!(
            resolve_logging(Some("warn"), None, Some(&file)),
            ("warn".to_string(), "json".to_string())
        );
        assert_eq!(
            resolve_logging(None, Some("text"), None),
            ("info".to_string(), "text".to_string())
        );
    }
}
