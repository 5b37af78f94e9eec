// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Node Configuration Types
//
// Defines the configuration schema for a peerhive node:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Node identity
// - User profile synchronization (fork retry bound and backoff)
// - User profile task queue draining
// - Observability settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "peerhive.io/v1";
pub const KIND: &str = "NodeConfig";

/// Top-level Kubernetes-style node configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfigManifest {
    /// API version (must be "peerhive.io/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "NodeConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: NodeConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable node name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfigSpec {
    /// Address other peers reach this node at
    #[serde(default = "default_node_address")]
    pub node_address: String,

    #[serde(default)]
    pub user_profile: UserProfileConfig,

    #[serde(default)]
    pub task_queue: TaskQueueConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Optimistic read-modify-write tuning for the user profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfileConfig {
    /// Retries after a version fork before the modification fails with VERSION_FORK
    #[serde(default = "default_max_fork_retries")]
    pub max_fork_retries: u32,

    /// Delay before the first retry; doubled on every further retry
    #[serde(default = "default_fork_backoff", with = "humantime_serde")]
    pub fork_backoff: Duration,

    /// Upper bound of the retry delay
    #[serde(default = "default_max_fork_backoff", with = "humantime_serde")]
    pub max_fork_backoff: Duration,

    /// How many applied task ids a profile remembers to avoid re-applying them
    #[serde(default = "default_applied_task_history")]
    pub applied_task_history: usize,
}

impl UserProfileConfig {
    /// Backoff before retry number `attempt` (1-based), capped at `max_fork_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.fork_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_fork_backoff)
            .min(self.max_fork_backoff)
    }
}

impl Default for UserProfileConfig {
    fn default() -> Self {
        Self {
            max_fork_retries: default_max_fork_retries(),
            fork_backoff: default_fork_backoff(),
            max_fork_backoff: default_max_fork_backoff(),
            applied_task_history: default_applied_task_history(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskQueueConfig {
    /// Drain the own task queue right after login
    #[serde(default = "default_true")]
    pub drain_on_login: bool,

    /// Stop a drain after this many tasks (unbounded when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tasks_per_drain: Option<usize>,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            drain_on_login: true,
            max_tasks_per_drain: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Output format ("compact" or "json")
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_node_address() -> String {
    "127.0.0.1:4622".to_string()
}

fn default_max_fork_retries() -> u32 {
    5
}

fn default_fork_backoff() -> Duration {
    Duration::from_millis(50)
}

fn default_max_fork_backoff() -> Duration {
    Duration::from_secs(2)
}

fn default_applied_task_history() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for NodeConfigSpec {
    fn default() -> Self {
        Self {
            node_address: default_node_address(),
            user_profile: UserProfileConfig::default(),
            task_queue: TaskQueueConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Default for NodeConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "peerhive-node".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: Some("1.0.0".to_string()),
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
    /// 1. PEERHIVE_CONFIG_PATH environment variable
    /// 2. ./peerhive-config.yaml (working directory)
    /// 3. ~/.peerhive/config.yaml (user home)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("PEERHIVE_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./peerhive-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".peerhive").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path: fail if missing/invalid
        if let Some(path) = path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
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
        if let Ok(val) = std::env::var("PEERHIVE_LOG_LEVEL") {
            tracing::info!("Environment override: PEERHIVE_LOG_LEVEL={}", val);
            self.spec.observability.log_level = val;
        }

        if let Ok(val) = std::env::var("PEERHIVE_MAX_FORK_RETRIES") {
            match val.parse::<u32>() {
                Ok(retries) => {
                    tracing::info!("Environment override: PEERHIVE_MAX_FORK_RETRIES={}", retries);
                    self.spec.user_profile.max_fork_retries = retries;
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for PEERHIVE_MAX_FORK_RETRIES: '{}'. Expected a number. Ignoring.",
                        val
                    );
                }
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

        let profile = &self.spec.user_profile;
        if profile.max_fork_retries == 0 {
            anyhow::bail!("spec.user_profile.max_fork_retries must be at least 1");
        }

        if profile.fork_backoff > profile.max_fork_backoff {
            anyhow::bail!(
                "spec.user_profile.fork_backoff ({:?}) exceeds max_fork_backoff ({:?})",
                profile.fork_backoff,
                profile.max_fork_backoff
            );
        }

        if profile.applied_task_history == 0 {
            anyhow::bail!("spec.user_profile.applied_task_history must be at least 1");
        }

        if self.spec.task_queue.max_tasks_per_drain == Some(0) {
            anyhow::bail!("spec.task_queue.max_tasks_per_drain must be at least 1 when set");
        }

        Ok(())
    }
}
