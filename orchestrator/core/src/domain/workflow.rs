// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Workflow Domain Model
//!
//! A workflow is a declarative graph of steps, each bound to one agent and
//! one task payload. Steps declare their dependencies by id; the engine runs
//! them either in declaration order or with maximal safe parallelism.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Workflow definitions, structural validation, error taxonomy
//!
//! # Example
//!
//! ```
//! use concord_core::domain::workflow::{WorkflowDefinition, WorkflowStep};
//! use concord_core::domain::message::Payload;
//!
//! let definition = WorkflowDefinition::new(
//!     "contract_review",
//!     "Contract Review",
//!     vec![
//!         WorkflowStep::new("analyze_contract", "contract_analysis", Payload::new()),
//!         WorkflowStep::new("generate_contract_report", "report_generation", Payload::new())
//!             .depends_on(["analyze_contract"]),
//!     ],
//! );
//! assert!(definition.validate().is_ok());
//! ```

use crate::domain::condition::{Condition, ConditionError};
use crate::domain::message::{MessagePriority, Payload};
use crate::domain::repository::RepositoryError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use thiserror::Error;

/// Result keys in the workflow context are `{step_id}{RESULT_SUFFIX}`.
pub const RESULT_SUFFIX: &str = "_result";

/// Task strings starting with this marker are replaced by a prior step result.
pub const SUBSTITUTION_MARKER: &str = "from_";

pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RETRY_COUNT: u32 = 3;
pub const DEFAULT_WORKFLOW_TIMEOUT: Duration = Duration::from_secs(300);

fn default_step_timeout() -> Duration {
    DEFAULT_STEP_TIMEOUT
}

fn default_retry_count() -> u32 {
    DEFAULT_RETRY_COUNT
}

fn default_workflow_timeout() -> Duration {
    DEFAULT_WORKFLOW_TIMEOUT
}

pub fn result_key(step_id: &str) -> String {
    format!("{}{}", step_id, RESULT_SUFFIX)
}

/// Values applied to manifest fields that are left unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowDefaults {
    pub step_timeout: Duration,
    pub retry_count: u32,
    pub workflow_timeout: Duration,
}

impl Default for WorkflowDefaults {
    fn default() -> Self {
        Self {
            step_timeout: DEFAULT_STEP_TIMEOUT,
            retry_count: DEFAULT_RETRY_COUNT,
            workflow_timeout: DEFAULT_WORKFLOW_TIMEOUT,
        }
    }
}

// ============================================================================
// Definition
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    pub agent_id: String,
    #[serde(default)]
    pub task: Payload,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default = "default_step_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Total number of attempts, not additional retries.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default)]
    pub priority: MessagePriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

impl WorkflowStep {
    pub fn new(id: impl Into<String>, agent_id: impl Into<String>, task: Payload) -> Self {
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            task,
            dependencies: Vec::new(),
            timeout: DEFAULT_STEP_TIMEOUT,
            retry_count: DEFAULT_RETRY_COUNT,
            priority: MessagePriority::default(),
            condition: None,
        }
    }

    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Parse and attach a guard condition.
    pub fn when(self, expression: &str) -> Result<Self, DefinitionError> {
        let condition = expression
            .parse()
            .map_err(|source| DefinitionError::InvalidCondition {
                step_id: self.id.clone(),
                source,
            })?;
        Ok(self.with_condition(condition))
    }

    /// Attempts the engine makes before giving up. Always at least one.
    pub fn attempts(&self) -> u32 {
        self.retry_count.max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    Stop,
    Continue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub parallel_execution: bool,
    #[serde(default = "default_workflow_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default)]
    pub on_failure: FailurePolicy,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            steps,
            parallel_execution: false,
            timeout: DEFAULT_WORKFLOW_TIMEOUT,
            on_failure: FailurePolicy::default(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel_execution = parallel;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn on_failure(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }

    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Distinct agent ids referenced by the steps, in first-use order.
    pub fn agent_ids(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.steps
            .iter()
            .map(|s| s.agent_id.as_str())
            .filter(|id| seen.insert(*id))
            .collect()
    }

    pub fn validate(&self) -> Result<(), DefinitionError> {
        WorkflowValidator::validate(self)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Structural problems with a workflow. Never retried.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("Workflow '{workflow_id}' has no steps")]
    EmptyWorkflow { workflow_id: String },

    #[error("Duplicate step id '{step_id}'")]
    DuplicateStep { step_id: String },

    #[error("Step '{step_id}' depends on unknown step '{dependency}'")]
    UnknownDependency { step_id: String, dependency: String },

    #[error("Circular dependency detected: {}", .cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    #[error("Step '{step_id}' references unknown agent '{agent_id}'")]
    UnknownAgent { step_id: String, agent_id: String },

    #[error("Invalid condition on step '{step_id}': {source}")]
    InvalidCondition {
        step_id: String,
        #[source]
        source: ConditionError,
    },
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error("Workflow '{0}' not found")]
    NotFound(String),

    #[error("Execution '{0}' not found")]
    ExecutionNotFound(String),

    #[error("Step '{step_id}' failed after {attempts} attempt(s): {message}")]
    StepFailed {
        step_id: String,
        attempts: u32,
        message: String,
    },

    #[error("Step '{step_id}' timed out after {attempts} attempt(s) of {timeout:?}")]
    StepTimeout {
        step_id: String,
        attempts: u32,
        timeout: Duration,
    },

    #[error("Condition on step '{step_id}' could not be evaluated: {source}")]
    ConditionFailed {
        step_id: String,
        #[source]
        source: ConditionError,
    },

    #[error("Deadlock detected: no runnable steps among {}", .pending.join(", "))]
    DeadlockDetected { pending: Vec<String> },

    #[error("Workflow '{workflow_id}' exceeded its timeout of {timeout:?}")]
    WorkflowTimeout {
        workflow_id: String,
        timeout: Duration,
    },

    #[error("Cannot {action} execution in state '{status}'")]
    InvalidState { action: String, status: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl WorkflowError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::Definition(DefinitionError::CircularDependency { .. }) => {
                "circular_dependency"
            }
            WorkflowError::Definition(DefinitionError::UnknownAgent { .. }) => "unknown_agent",
            WorkflowError::Definition(_) => "invalid_definition",
            WorkflowError::NotFound(_) => "workflow_not_found",
            WorkflowError::ExecutionNotFound(_) => "execution_not_found",
            WorkflowError::StepFailed { .. } => "step_failed",
            WorkflowError::StepTimeout { .. } => "step_timeout",
            WorkflowError::ConditionFailed { .. } => "condition_error",
            WorkflowError::DeadlockDetected { .. } => "deadlock",
            WorkflowError::WorkflowTimeout { .. } => "workflow_timeout",
            WorkflowError::InvalidState { .. } => "invalid_state",
            WorkflowError::Repository(_) => "repository_error",
        }
    }

    /// Structural failures abort regardless of the failure policy.
    pub fn is_definition(&self) -> bool {
        matches!(self, WorkflowError::Definition(_))
    }
}

// ============================================================================
// Validation
// ============================================================================

pub struct WorkflowValidator;

impl WorkflowValidator {
    pub fn validate(workflow: &WorkflowDefinition) -> Result<(), DefinitionError> {
        if workflow.steps.is_empty() {
            return Err(DefinitionError::EmptyWorkflow {
                workflow_id: workflow.id.clone(),
            });
        }

        let mut ids = HashSet::new();
        for step in &workflow.steps {
            if !ids.insert(step.id.as_str()) {
                return Err(DefinitionError::DuplicateStep {
                    step_id: step.id.clone(),
                });
            }
        }

        for step in &workflow.steps {
            if let Some(missing) = step.dependencies.iter().find(|d| !ids.contains(d.as_str())) {
                return Err(DefinitionError::UnknownDependency {
                    step_id: step.id.clone(),
                    dependency: missing.clone(),
                });
            }
        }

        Self::check_for_cycles(workflow)
    }

    /// Depth-first search over dependency edges; reports the first cycle found.
    pub fn check_for_cycles(workflow: &WorkflowDefinition) -> Result<(), DefinitionError> {
        fn visit<'a>(
            current: &'a str,
            edges: &HashMap<&'a str, Vec<&'a str>>,
            visited: &mut HashSet<&'a str>,
            stack: &mut Vec<&'a str>,
        ) -> Option<Vec<String>> {
            if let Some(pos) = stack.iter().position(|s| *s == current) {
                let mut cycle: Vec<String> = stack[pos..].iter().map(|s| s.to_string()).collect();
                cycle.push(current.to_string());
                return Some(cycle);
            }
            if !visited.insert(current) {
                return None;
            }

            stack.push(current);
            for &next in edges.get(current).into_iter().flatten() {
                if let Some(cycle) = visit(next, edges, visited, stack) {
                    return Some(cycle);
                }
            }
            stack.pop();
            None
        }

        let edges: HashMap<&str, Vec<&str>> = workflow
            .steps
            .iter()
            .map(|s| {
                (
                    s.id.as_str(),
                    s.dependencies.iter().map(String::as_str).collect(),
                )
            })
            .collect();

        let mut visited = HashSet::new();
        for step in &workflow.steps {
            let mut stack = Vec::new();
            if let Some(cycle) = visit(&step.id, &edges, &mut visited, &mut stack) {
                return Err(DefinitionError::CircularDependency { cycle });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, deps: &[&str]) -> WorkflowStep {
        WorkflowStep::new(id, "worker", Payload::new()).depends_on(deps.iter().copied())
    }

    #[test]
    fn step_defaults() {
        let s = step("a", &[]);
        assert_eq!(s.timeout, Duration::from_secs(30));
        assert_eq!(s.retry_count, 3);
        assert_eq!(s.priority, MessagePriority::Normal);
        assert_eq!(s.with_retry_count(0).attempts(), 1);
    }

    #[test]
    fn accepts_dag() {
        let wf = WorkflowDefinition::new(
            "wf",
            "wf",
            vec![step("a", &[]), step("b", &[]), step("c", &["a", "b"])],
        );
        assert!(wf.validate().is_ok());
    }

    #[test]
    fn rejects_mutual_dependency() {
        let wf = WorkflowDefinition::new("wf", "wf", vec![step("a", &["b"]), step("b", &["a"])]);
        match wf.validate() {
            Err(DefinitionError::CircularDependency { cycle }) => {
                assert_eq!(cycle.first(), cycle.last());
                assert_eq!(cycle.len(), 3);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn rejects_self_dependency() {
        let wf = WorkflowDefinition::new("wf", "wf", vec![step("a", &["a"])]);
        assert!(matches!(
            wf.validate(),
            Err(DefinitionError::CircularDependency { .. })
        ));
    }

    #[test]
    fn rejects_unknown_dependency_and_duplicates() {
        let wf = WorkflowDefinition::new("wf", "wf", vec![step("a", &["ghost"])]);
        assert!(matches!(
            wf.validate(),
            Err(DefinitionError::UnknownDependency { .. })
        ));

        let wf = WorkflowDefinition::new("wf", "wf", vec![step("a", &[]), step("a", &[])]);
        assert!(matches!(wf.validate(), Err(DefinitionError::DuplicateStep { .. })));

        let wf = WorkflowDefinition::new("wf", "wf", vec![]);
        assert!(matches!(wf.validate(), Err(DefinitionError::EmptyWorkflow { .. })));
    }

    #[test]
    fn invalid_condition_is_a_definition_error() {
        let err = step("a", &[]).when("total >").unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidCondition { .. }));
    }

    #[test]
    fn error_codes_are_stable() {
        let err = WorkflowError::from(DefinitionError::CircularDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        });
        assert_eq!(err.code(), "circular_dependency");
        assert_eq!(err.to_string(), "Circular dependency detected: a -> b -> a");
        assert!(err.is_definition());
    }

    #[test]
    fn deserializes_with_defaults_and_humantime() {
        let wf: WorkflowDefinition = serde_json::from_value(serde_json::json!({
            "id": "wf",
            "name": "Workflow",
            "timeout": "2m",
            "on_failure": "continue",
            "steps": [
                { "id": "a", "agent_id": "worker", "timeout": "5s", "condition": "ready" }
            ]
        }))
        .unwrap();
        assert_eq!(wf.timeout, Duration::from_secs(120));
        assert_eq!(wf.on_failure, FailurePolicy::Continue);
        assert_eq!(wf.steps[0].timeout, Duration::from_secs(5));
        assert_eq!(wf.steps[0].retry_count, 3);
        assert!(wf.steps[0].condition.is_some());
    }
}
