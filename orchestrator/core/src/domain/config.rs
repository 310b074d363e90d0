// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Coordinator Configuration
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) describing how a
// coordinator process wires its bus, engine and agents:
// - communication timeouts and heartbeat cadence
// - engine retry backoff and workflow defaults
// - per-agent configuration overrides
// - where workflow manifests live
// - log level

use crate::domain::agent::{AgentCategory, AgentConfig};
use crate::domain::message::Payload;
use crate::domain::workflow::{
    WorkflowDefaults, DEFAULT_RETRY_COUNT, DEFAULT_STEP_TIMEOUT, DEFAULT_WORKFLOW_TIMEOUT,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "concord/v1";
pub const CONFIG_KIND: &str = "CoordinatorConfig";
pub const CONFIG_PATH_ENV: &str = "CONCORD_CONFIG_PATH";

/// Top-level coordinator configuration manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcordConfig {
    /// API version (must be "concord/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "CoordinatorConfig")
    pub kind: String,

    pub metadata: ConfigMetadata,

    #[serde(default)]
    pub spec: ConcordSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMetadata {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConcordSpec {
    #[serde(default)]
    pub communication: CommunicationConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    /// Configuration overrides keyed by agent id
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub agents: BTreeMap<String, AgentOverride>,

    /// Directory of workflow manifests loaded at startup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflows_dir: Option<PathBuf>,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunicationConfig {
    /// Default deadline for `send_request`
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    #[serde(default = "default_heartbeat_interval", with = "humantime_serde")]
    pub heartbeat_interval: Duration,
}

impl Default for CommunicationConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            heartbeat_interval: default_heartbeat_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Pause between attempts of a failing step
    #[serde(default = "default_retry_backoff", with = "humantime_serde")]
    pub retry_backoff: Duration,

    #[serde(default = "default_step_timeout", with = "humantime_serde")]
    pub default_step_timeout: Duration,

    #[serde(default = "default_retry_count")]
    pub default_retry_count: u32,

    #[serde(default = "default_workflow_timeout", with = "humantime_serde")]
    pub default_workflow_timeout: Duration,

    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_backoff: default_retry_backoff(),
            default_step_timeout: default_step_timeout(),
            default_retry_count: default_retry_count(),
            default_workflow_timeout: default_workflow_timeout(),
            history_limit: default_history_limit(),
        }
    }
}

impl EngineConfig {
    /// Defaults applied to manifest fields left unset.
    pub fn workflow_defaults(&self) -> WorkflowDefaults {
        WorkflowDefaults {
            step_timeout: self.default_step_timeout,
            retry_count: self.default_retry_count,
            workflow_timeout: self.default_workflow_timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<AgentCategory>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,

    #[serde(default, skip_serializing_if = "Payload::is_empty")]
    pub settings: Payload,
}

impl AgentOverride {
    /// Merge onto the default configuration for `agent_id`.
    pub fn to_agent_config(&self, agent_id: &str) -> AgentConfig {
        self.apply_to(AgentConfig::default_for(agent_id))
    }

    /// Overlay the fields set here onto `base`. Settings are merged key by key.
    pub fn apply_to(&self, mut config: AgentConfig) -> AgentConfig {
        if let Some(title) = &self.title {
            config.title = title.clone();
        }
        if let Some(category) = self.category {
            config.category = category;
        }
        if !self.capabilities.is_empty() {
            config.capabilities = self.capabilities.clone();
        }
        for (key, value) in &self.settings {
            config.settings.insert(key.clone(), value.clone());
        }
        config
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (e.g., "info", "debug", "concord_core=trace")
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_retry_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_step_timeout() -> Duration {
    DEFAULT_STEP_TIMEOUT
}

fn default_retry_count() -> u32 {
    DEFAULT_RETRY_COUNT
}

fn default_workflow_timeout() -> Duration {
    DEFAULT_WORKFLOW_TIMEOUT
}

fn default_history_limit() -> usize {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ConcordConfig {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: CONFIG_KIND.to_string(),
            metadata: ConfigMetadata {
                name: "default".to_string(),
                labels: None,
            },
            spec: ConcordSpec::default(),
        }
    }
}

impl ConcordConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Candidate locations, highest precedence first:
    /// 1. CONCORD_CONFIG_PATH environment variable
    /// 2. ./concord-config.yaml (working directory)
    /// 3. ~/.concord/config.yaml (user home)
    /// 4. /etc/concord/config.yaml (system, Unix) or C:\ProgramData\Concord\config.yaml (Windows)
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            paths.push(PathBuf::from(path));
        }
        paths.push(PathBuf::from("./concord-config.yaml"));
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".concord").join("config.yaml"));
        }
        #[cfg(unix)]
        paths.push(PathBuf::from("/etc/concord/config.yaml"));
        #[cfg(windows)]
        paths.push(PathBuf::from("C:\\ProgramData\\Concord\\config.yaml"));
        paths
    }

    /// First existing file among [`Self::search_paths`]
    pub fn discover_config() -> Option<PathBuf> {
        Self::search_paths().into_iter().find(|p| p.exists())
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!(path = %path.display(), "Loading configuration from explicit path");
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {}: {}", path.display(), e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let mut config = match Self::discover_config() {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading configuration from discovered path");
                Self::from_yaml_file(&path).map_err(|e| {
                    anyhow::anyhow!("Failed to load config at {}: {}", path.display(), e)
                })?
            }
            None => {
                tracing::debug!("No configuration file found in standard locations, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CONCORD_REQUEST_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) => {
                    tracing::info!("Environment override: CONCORD_REQUEST_TIMEOUT_SECS={}", secs);
                    self.spec.communication.request_timeout = Duration::from_secs(secs);
                }
                Err(_) => tracing::warn!(
                    "Invalid value for CONCORD_REQUEST_TIMEOUT_SECS: '{}'. Expected seconds. Ignoring.",
                    val
                ),
            }
        }

        if let Ok(val) = std::env::var("CONCORD_RETRY_BACKOFF_MS") {
            match val.parse::<u64>() {
                Ok(millis) => {
                    tracing::info!("Environment override: CONCORD_RETRY_BACKOFF_MS={}", millis);
                    self.spec.engine.retry_backoff = Duration::from_millis(millis);
                }
                Err(_) => tracing::warn!(
                    "Invalid value for CONCORD_RETRY_BACKOFF_MS: '{}'. Expected milliseconds. Ignoring.",
                    val
                ),
            }
        }

        if let Ok(val) = std::env::var("CONCORD_LOG_LEVEL") {
            if !val.is_empty() {
                tracing::info!("Environment override: CONCORD_LOG_LEVEL={}", val);
                self.spec.observability.log_level = val;
            }
        }

        if let Ok(val) = std::env::var("CONCORD_WORKFLOWS_DIR") {
            if !val.is_empty() {
                tracing::info!("Environment override: CONCORD_WORKFLOWS_DIR={}", val);
                self.spec.workflows_dir = Some(PathBuf::from(val));
            }
        }
    }

    /// Agent configurations declared under `spec.agents`
    pub fn agent_configs(&self) -> Vec<AgentConfig> {
        self.spec
            .agents
            .iter()
            .map(|(id, over)| over.to_agent_config(id))
            .collect()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != CONFIG_KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, CONFIG_KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let communication = &self.spec.communication;
        if communication.request_timeout.is_zero() {
            anyhow::bail!("spec.communication.request_timeout must be greater than zero");
        }
        if communication.heartbeat_interval.is_zero() {
            anyhow::bail!("spec.communication.heartbeat_interval must be greater than zero");
        }

        let engine = &self.spec.engine;
        if engine.default_step_timeout.is_zero() {
            anyhow::bail!("spec.engine.default_step_timeout must be greater than zero");
        }
        if engine.default_workflow_timeout.is_zero() {
            anyhow::bail!("spec.engine.default_workflow_timeout must be greater than zero");
        }
        if engine.default_retry_count == 0 {
            anyhow::bail!("spec.engine.default_retry_count must be at least 1");
        }

        if let Some(id) = self.spec.agents.keys().find(|id| id.is_empty()) {
            anyhow::bail!("spec.agents contains an empty agent id: '{}'", id);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_manifest() {
        let config = ConcordConfig::default();
        assert_eq!(config.api_version, "concord/v1");
        assert_eq!(config.kind, "CoordinatorConfig");
        assert_eq!(config.spec.engine.retry_backoff, Duration::from_secs(1));
        assert_eq!(config.spec.engine.history_limit, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_with_humantime_and_agents() {
        let yaml = r#"
apiVersion: concord/v1
kind: CoordinatorConfig
metadata:
  name: staging
spec:
  communication:
    request_timeout: 5s
  engine:
    retry_backoff: 250ms
    default_retry_count: 2
  agents:
    expense_approval:
      title: Expense Approval
      category: financial_automation
      capabilities: [approve]
  workflows_dir: ./workflows
"#;
        let config = ConcordConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.spec.communication.request_timeout, Duration::from_secs(5));
        assert_eq!(config.spec.communication.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.spec.engine.retry_backoff, Duration::from_millis(250));
        assert_eq!(config.spec.engine.workflow_defaults().retry_count, 2);
        assert_eq!(config.spec.workflows_dir, Some(PathBuf::from("./workflows")));

        let agents = config.agent_configs();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].agent_id, "expense_approval");
        assert_eq!(agents[0].category, AgentCategory::FinancialAutomation);
        assert_eq!(agents[0].capabilities, vec!["approve".to_string()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = ConcordConfig::default();
        config.api_version = "v2".to_string();
        assert!(config.validate().is_err());

        let mut config = ConcordConfig::default();
        config.kind = "Workflow".to_string();
        assert!(config.validate().is_err());

        let mut config = ConcordConfig::default();
        config.spec.communication.request_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = ConcordConfig::default();
        config.spec.engine.default_retry_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("concord-config.yaml");

        let mut config = ConcordConfig::default();
        config.metadata.name = "roundtrip".to_string();
        config.spec.engine.retry_backoff = Duration::from_millis(10);
        config.to_yaml_file(&path).unwrap();

        let loaded = ConcordConfig::load_or_default(Some(path)).unwrap();
        assert_eq!(loaded.metadata.name, "roundtrip");
        assert_eq!(loaded.spec.engine.retry_backoff, Duration::from_millis(10));
    }

    #[test]
    fn test_explicit_path_must_parse() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "apiVersion: [not, a, string").unwrap();
        assert!(ConcordConfig::load_or_default(Some(file.path().to_path_buf())).is_err());
        assert!(ConcordConfig::load_or_default(Some(PathBuf::from("/nonexistent/concord.yaml"))).is_err());
    }
}
