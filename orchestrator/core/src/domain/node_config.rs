// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Node Configuration Types
//
// Defines the configuration schema for an automa scheduler node:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Sandbox image and resource limits
// - Scheduler concurrency and misfire settings
// - Container engine retry policy
// - Storage and observability settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "automa/v1";
pub const KIND: &str = "NodeConfig";

/// Top-level Kubernetes-style node configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfigManifest {
    /// API version (must be "automa/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "NodeConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: NodeConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfigSpec {
    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub maintenance: MaintenanceConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Sandbox container settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_image")]
    pub image: String,

    /// Hard memory limit, e.g. "256m", "1g"
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,

    /// Fractional CPUs
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: f64,

    #[serde(default = "default_cpuset")]
    pub cpuset_cpus: String,

    /// Wall-clock limit for run-to-completion executions
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default = "default_command")]
    pub command: Vec<String>,

    #[serde(default = "default_script_mount_path")]
    pub script_mount_path: String,

    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_seconds: u64,

    #[serde(default = "default_emergency_stop_timeout")]
    pub emergency_stop_timeout_seconds: u64,

    /// Docker socket path; local defaults when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_socket: Option<String>,

    /// Network for detached agent containers; engine default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_network: Option<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            memory_limit: default_memory_limit(),
            cpu_limit: default_cpu_limit(),
            cpuset_cpus: default_cpuset(),
            timeout_seconds: default_timeout_seconds(),
            user: default_user(),
            command: default_command(),
            script_mount_path: default_script_mount_path(),
            stop_timeout_seconds: default_stop_timeout(),
            emergency_stop_timeout_seconds: default_emergency_stop_timeout(),
            docker_socket: None,
            agent_network: None,
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_seconds)
    }

    pub fn emergency_stop_timeout(&self) -> Duration {
        Duration::from_secs(self.emergency_stop_timeout_seconds)
    }

    pub fn memory_bytes(&self) -> anyhow::Result<i64> {
        parse_memory_limit(&self.memory_limit)
    }

    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_limit * 1_000_000_000.0).round() as i64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Concurrent in-flight dispatches allowed per job
    #[serde(default = "default_max_instances")]
    pub max_instances: usize,

    /// How late a fire may be and still run
    #[serde(default = "default_misfire_grace")]
    pub misfire_grace_seconds: u64,

    /// `once` jobs created without an explicit time fire this far in the future
    #[serde(default = "default_once_delay")]
    pub once_default_delay_seconds: u64,

    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Upper bound on waiting for in-flight dispatches at shutdown
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_instances: default_max_instances(),
            misfire_grace_seconds: default_misfire_grace(),
            once_default_delay_seconds: default_once_delay(),
            tick_interval_ms: default_tick_interval(),
            drain_timeout_seconds: default_drain_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            multiplier: default_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// 0 disables the periodic orphan sweep
    #[serde(default = "default_orphan_sweep")]
    pub orphan_sweep_interval_seconds: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            orphan_sweep_interval_seconds: default_orphan_sweep(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL URL; in-memory repositories when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_image() -> String {
    "automa-sandbox:latest".to_string()
}

fn default_memory_limit() -> String {
    "256m".to_string()
}

fn default_cpu_limit() -> f64 {
    0.5
}

fn default_cpuset() -> String {
    "0".to_string()
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_user() -> String {
    "sandbox:sandbox".to_string()
}

fn default_command() -> Vec<String> {
    vec!["python".to_string(), "/app/script.py".to_string()]
}

fn default_script_mount_path() -> String {
    "/app/script.py".to_string()
}

fn default_stop_timeout() -> u64 {
    10
}

fn default_emergency_stop_timeout() -> u64 {
    5
}

fn default_max_instances() -> usize {
    3
}

fn default_misfire_grace() -> u64 {
    300
}

fn default_once_delay() -> u64 {
    60
}

fn default_tick_interval() -> u64 {
    1000
}

fn default_drain_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    1000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_orphan_sweep() -> u64 {
    600
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

/// Parse a Docker-style memory size ("512k", "256m", "1g", or plain bytes).
pub fn parse_memory_limit(raw: &str) -> anyhow::Result<i64> {
    let raw = raw.trim().to_lowercase();
    let (digits, multiplier) = match raw.chars().last() {
        Some('k') => (&raw[..raw.len() - 1], 1024),
        Some('m') => (&raw[..raw.len() - 1], 1024 * 1024),
        Some('g') => (&raw[..raw.len() - 1], 1024 * 1024 * 1024),
        Some(c) if c.is_ascii_digit() => (raw.as_str(), 1),
        _ => anyhow::bail!("Invalid memory limit: '{}'", raw),
    };
    let value: i64 = digits
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid memory limit: '{}'", raw))?;
    if value <= 0 {
        anyhow::bail!("Memory limit must be positive: '{}'", raw);
    }
    Ok(value * multiplier)
}

impl Default for NodeConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "automa-node".to_string(),
                labels: None,
            },
            spec: NodeConfigSpec::default(),
        }
    }
}

impl NodeConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. AUTOMA_CONFIG_PATH environment variable
    /// 2. ./automa-config.yaml (working directory)
    /// 3. ~/.automa/config.yaml (user home)
    /// 4. /etc/automa/config.yaml
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("AUTOMA_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./automa-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".automa").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/automa/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("AUTOMA_DATABASE_URL") {
            tracing::info!("Environment override: AUTOMA_DATABASE_URL");
            self.spec.database.url = Some(url);
        }

        if let Some(image) = lookup("AUTOMA_SANDBOX_IMAGE") {
            tracing::info!("Environment override: AUTOMA_SANDBOX_IMAGE={}", image);
            self.spec.sandbox.image = image;
        }

        if let Some(memory) = lookup("AUTOMA_SANDBOX_MEMORY_LIMIT") {
            tracing::info!("Environment override: AUTOMA_SANDBOX_MEMORY_LIMIT={}", memory);
            self.spec.sandbox.memory_limit = memory;
        }

        if let Some(val) = lookup("AUTOMA_SANDBOX_CPU_LIMIT") {
            match val.parse::<f64>() {
                Ok(cpus) => {
                    tracing::info!("Environment override: AUTOMA_SANDBOX_CPU_LIMIT={}", cpus);
                    self.spec.sandbox.cpu_limit = cpus;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for AUTOMA_SANDBOX_CPU_LIMIT: '{}'. Expected a number. Ignoring.",
                    val
                ),
            }
        }

        if let Some(val) = lookup("AUTOMA_SANDBOX_TIMEOUT") {
            match val.parse::<u64>() {
                Ok(secs) => {
                    tracing::info!("Environment override: AUTOMA_SANDBOX_TIMEOUT={}", secs);
                    self.spec.sandbox.timeout_seconds = secs;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for AUTOMA_SANDBOX_TIMEOUT: '{}'. Expected seconds. Ignoring.",
                    val
                ),
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let sandbox = &self.spec.sandbox;
        if sandbox.image.trim().is_empty() {
            anyhow::bail!("spec.sandbox.image cannot be empty");
        }
        sandbox.memory_bytes()?;
        if sandbox.cpu_limit <= 0.0 {
            anyhow::bail!("spec.sandbox.cpu_limit must be greater than 0");
        }
        if sandbox.timeout_seconds == 0 {
            anyhow::bail!("spec.sandbox.timeout_seconds must be greater than 0");
        }
        if sandbox.command.is_empty() {
            anyhow::bail!("spec.sandbox.command cannot be empty");
        }

        if self.spec.scheduler.max_instances == 0 {
            anyhow::bail!("spec.scheduler.max_instances must be at least 1");
        }
        if self.spec.scheduler.tick_interval_ms == 0 {
            anyhow::bail!("spec.scheduler.tick_interval_ms must be greater than 0");
        }

        if self.spec.retry.max_attempts == 0 {
            anyhow::bail!("spec.retry.max_attempts must be at least 1");
        }
        if self.spec.retry.multiplier < 1.0 {
            anyhow::bail!("spec.retry.multiplier must be >= 1.0");
        }

        if let Some(url) = &self.spec.database.url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                anyhow::bail!("spec.database.url must be a PostgreSQL URL");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = NodeConfigManifest::default();
        assert_eq!(manifest.api_version, API_VERSION);
        assert_eq!(manifest.kind, "NodeConfig");
        assert_eq!(manifest.spec.sandbox.image, "automa-sandbox:latest");
        assert_eq!(manifest.spec.scheduler.max_instances, 3);
        assert_eq!(manifest.spec.scheduler.misfire_grace_seconds, 300);
        assert!(manifest.spec.database.url.is_none());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
apiVersion: automa/v1
kind: NodeConfig
metadata:
  name: edge-1
spec:
  sandbox:
    image: registry.local/sandbox:3.12
    timeout_seconds: 60
  scheduler:
    max_instances: 1
"#;
        let manifest = NodeConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(manifest.metadata.name, "edge-1");
        assert_eq!(manifest.spec.sandbox.image, "registry.local/sandbox:3.12");
        assert_eq!(manifest.spec.sandbox.timeout_seconds, 60);
        assert_eq!(manifest.spec.sandbox.memory_limit, "256m");
        assert_eq!(manifest.spec.scheduler.max_instances, 1);
        assert_eq!(manifest.spec.retry.max_attempts, 3);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut manifest = NodeConfigManifest::default();
        manifest.spec.database.url = Some("postgres://automa@localhost/automa".into());
        manifest.to_yaml_file(&path).unwrap();

        let parsed = NodeConfigManifest::from_yaml_file(&path).unwrap();
        assert_eq!(
            parsed.spec.database.url.as_deref(),
            Some("postgres://automa@localhost/automa")
        );
        assert_eq!(parsed.spec.sandbox.command, vec!["python", "/app/script.py"]);
    }

    #[test]
    fn test_validation() {
        let mut manifest = NodeConfigManifest::default();
        assert!(manifest.validate().is_ok());

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.spec.sandbox.memory_limit = "lots".to_string();
        assert!(manifest.validate().is_err());
        manifest.spec.sandbox.memory_limit = "512m".to_string();

        manifest.spec.scheduler.max_instances = 0;
        assert!(manifest.validate().is_err());
        manifest.spec.scheduler.max_instances = 3;

        manifest.spec.retry.multiplier = 0.5;
        assert!(manifest.validate().is_err());
        manifest.spec.retry.multiplier = 2.0;

        manifest.spec.database.url = Some("mysql://nope".to_string());
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let mut manifest = NodeConfigManifest::default();
        let env = HashMap::from([
            ("AUTOMA_SANDBOX_IMAGE", "custom:1"),
            ("AUTOMA_SANDBOX_TIMEOUT", "45"),
            ("AUTOMA_SANDBOX_CPU_LIMIT", "not-a-number"),
        ]);
        manifest.apply_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(manifest.spec.sandbox.image, "custom:1");
        assert_eq!(manifest.spec.sandbox.timeout_seconds, 45);
        assert_eq!(manifest.spec.sandbox.cpu_limit, 0.5);
    }

    #[test]
    fn test_memory_limit_parsing() {
        assert_eq!(parse_memory_limit("256m").unwrap(), 256 * 1024 * 1024);
        assert_eq!(parse_memory_limit("1G").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_memory_limit("4096").unwrap(), 4096);
        assert!(parse_memory_limit("").is_err());
        assert!(parse_memory_limit("0m").is_err());
    }

    #[test]
    fn test_nano_cpus() {
        let sandbox = SandboxConfig::default();
        assert_eq!(sandbox.nano_cpus(), 500_000_000);
    }
}
