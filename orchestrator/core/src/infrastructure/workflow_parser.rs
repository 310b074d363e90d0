// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Workflow YAML Parser
//!
//! This module provides infrastructure for parsing workflow YAML manifests
//! into domain objects.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Parse external YAML → Domain objects
//! - **Anti-Corruption:** Translates YAML schema to domain model
//!
//! # Manifest Format
//!
//! ```yaml
//! apiVersion: concord/v1
//! kind: Workflow
//! metadata:
//!   name: contract_review
//!   title: Contract Review
//!   description: Analyze a contract and check it against procurement rules
//! spec:
//!   parallelExecution: false
//!   timeout: 15m
//!   onFailure: stop
//!   steps:
//!     - id: analyze_contract
//!       agentId: contract_analysis
//!       task: { type: full_analysis, include_risk_assessment: true }
//!     - id: check_procurement_rules
//!       agentId: procurement_assistant
//!       task: { type: validate_contract, contract_data: from_analyze_contract }
//!       dependsOn: [analyze_contract]
//!       retryCount: 2
//!       condition: "analyze_contract_result.risk_score > 0.3"
//! ```
//!
//! Unset step and workflow fields take their values from
//! [`WorkflowDefaults`].

use crate::domain::message::{MessagePriority, Payload};
use crate::domain::workflow::{
    DefinitionError, FailurePolicy, WorkflowDefaults, WorkflowDefinition, WorkflowStep,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const API_VERSION: &str = "concord/v1";
pub const WORKFLOW_KIND: &str = "Workflow";

// ============================================================================
// YAML Schema (External Representation)
// ============================================================================

/// External YAML representation of a workflow manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowManifest {
    pub api_version: String,
    pub kind: String,
    pub metadata: WorkflowMetadataYaml,
    pub spec: WorkflowSpecYaml,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMetadataYaml {
    /// Workflow id
    pub name: String,
    /// Display name, defaults to `name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSpecYaml {
    #[serde(default)]
    pub parallel_execution: bool,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub on_failure: FailurePolicy,
    pub steps: Vec<WorkflowStepYaml>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStepYaml {
    pub id: String,
    pub agent_id: String,
    #[serde(default)]
    pub task: Payload,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub retry_count: Option<u32>,
    #[serde(default)]
    pub priority: Option<MessagePriority>,
    #[serde(default)]
    pub condition: Option<String>,
}

// ============================================================================
// Parser
// ============================================================================

/// Workflow parser (Infrastructure service)
pub struct WorkflowParser;

impl WorkflowParser {
    /// Parse a workflow manifest from YAML file
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<WorkflowDefinition, WorkflowParseError> {
        Self::parse_file_with(path, &WorkflowDefaults::default())
    }

    pub fn parse_file_with<P: AsRef<Path>>(
        path: P,
        defaults: &WorkflowDefaults,
    ) -> Result<WorkflowDefinition, WorkflowParseError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| WorkflowParseError::IoError {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;

        Self::parse_yaml_with(&content, defaults)
    }

    /// Parse a workflow manifest from YAML string
    pub fn parse_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowParseError> {
        Self::parse_yaml_with(yaml, &WorkflowDefaults::default())
    }

    pub fn parse_yaml_with(
        yaml: &str,
        defaults: &WorkflowDefaults,
    ) -> Result<WorkflowDefinition, WorkflowParseError> {
        let manifest: WorkflowManifest = serde_yaml::from_str(yaml)
            .map_err(|e| WorkflowParseError::YamlError(e.to_string()))?;

        Self::validate_and_convert(manifest, defaults)
    }

    /// Parse every `*.yaml` / `*.yml` file in `dir`, in file name order.
    pub fn load_dir<P: AsRef<Path>>(
        dir: P,
        defaults: &WorkflowDefaults,
    ) -> Result<Vec<WorkflowDefinition>, WorkflowParseError> {
        let dir = dir.as_ref();
        let io_error = |e: std::io::Error| WorkflowParseError::IoError {
            path: dir.display().to_string(),
            error: e.to_string(),
        };

        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            let is_manifest = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext == "yaml" || ext == "yml");
            if path.is_file() && is_manifest {
                paths.push(path);
            }
        }
        paths.sort();

        paths
            .iter()
            .map(|path| {
                tracing::debug!(path = %path.display(), "Loading workflow manifest");
                Self::parse_file_with(path, defaults)
            })
            .collect()
    }

    /// Validate manifest and convert to domain object
    fn validate_and_convert(
        manifest: WorkflowManifest,
        defaults: &WorkflowDefaults,
    ) -> Result<WorkflowDefinition, WorkflowParseError> {
        if manifest.api_version != API_VERSION {
            return Err(WorkflowParseError::InvalidApiVersion {
                expected: API_VERSION.to_string(),
                got: manifest.api_version,
            });
        }

        if manifest.kind != WORKFLOW_KIND {
            return Err(WorkflowParseError::InvalidKind {
                expected: WORKFLOW_KIND.to_string(),
                got: manifest.kind,
            });
        }

        if manifest.metadata.name.trim().is_empty() {
            return Err(WorkflowParseError::ValidationError(
                "metadata.name cannot be empty".to_string(),
            ));
        }

        let steps = manifest
            .spec
            .steps
            .into_iter()
            .map(|step| Self::convert_step(step, defaults))
            .collect::<Result<Vec<_>, _>>()?;

        let metadata = manifest.metadata;
        let title = metadata.title.unwrap_or_else(|| metadata.name.clone());
        let mut definition = WorkflowDefinition::new(metadata.name, title, steps)
            .parallel(manifest.spec.parallel_execution)
            .with_timeout(manifest.spec.timeout.unwrap_or(defaults.workflow_timeout))
            .on_failure(manifest.spec.on_failure)
            .with_description(metadata.description.unwrap_or_default());
        definition.metadata = metadata.labels;

        definition.validate()?;
        Ok(definition)
    }

    fn convert_step(
        yaml: WorkflowStepYaml,
        defaults: &WorkflowDefaults,
    ) -> Result<WorkflowStep, WorkflowParseError> {
        let step = WorkflowStep::new(yaml.id, yaml.agent_id, yaml.task)
            .depends_on(yaml.depends_on)
            .with_timeout(yaml.timeout.unwrap_or(defaults.step_timeout))
            .with_retry_count(yaml.retry_count.unwrap_or(defaults.retry_count))
            .with_priority(yaml.priority.unwrap_or_default());

        match yaml.condition.as_deref().map(str::trim) {
            Some(expression) if !expression.is_empty() => Ok(step.when(expression)?),
            _ => Ok(step),
        }
    }
}

/// The workflow manifests bundled with the crate.
pub fn builtin_workflows() -> Result<Vec<WorkflowDefinition>, WorkflowParseError> {
    const MANIFESTS: [&str; 3] = [
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../../workflows/customer-onboarding.yaml"
        )),
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../../workflows/expense-processing.yaml"
        )),
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../../workflows/contract-review.yaml"
        )),
    ];

    MANIFESTS
        .iter()
        .map(|yaml| WorkflowParser::parse_yaml(yaml))
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowParseError {
    #[error("IO error reading {path}: {error}")]
    IoError { path: String, error: String },

    #[error("YAML parse error: {0}")]
    YamlError(String),

    #[error("Invalid API version: expected '{expected}', got '{got}'")]
    InvalidApiVersion { expected: String, got: String },

    #[error("Invalid kind: expected '{expected}', got '{got}'")]
    InvalidKind { expected: String, got: String },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error(transparent)]
    Definition(#[from] DefinitionError),
}
