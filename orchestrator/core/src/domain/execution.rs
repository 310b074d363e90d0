// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Workflow execution record
//
// One WorkflowExecution exists per invocation of a workflow definition. It is
// mutated only by the engine driving that run and kept in history afterwards.

use crate::domain::message::Payload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ExecutionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub message: String,
}

/// Machine-readable code plus human-readable message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
}

impl From<&crate::domain::workflow::WorkflowError> for ErrorEnvelope {
    fn from(err: &crate::domain::workflow::WorkflowError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRunResult {
    pub workflow_completed: bool,
    pub steps_executed: usize,
    pub step_results: BTreeMap<String, Payload>,
    pub skipped_steps: Vec<String>,
    pub failed_steps: Vec<String>,
}

/// What a caller gets back from running a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub execution_id: ExecutionId,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub result: WorkflowRunResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
    /// Seconds.
    pub duration: f64,
    pub error_log: Vec<ErrorLogEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStatusView {
    pub execution_id: ExecutionId,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub current_step: Option<String>,
    pub running_steps: Vec<String>,
    pub completed_steps: Vec<String>,
    pub total_steps: usize,
    pub progress_percentage: f64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub errors: Vec<ErrorLogEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub execution_id: ExecutionId,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<f64>,
    pub steps_completed: usize,
    pub result_summary: String,
    pub error_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: ExecutionId,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub input: Payload,
    pub step_results: BTreeMap<String, Payload>,
    pub completed_steps: Vec<String>,
    pub running_steps: Vec<String>,
    pub skipped_steps: Vec<String>,
    pub failed_steps: Vec<String>,
    pub total_steps: usize,
    pub error_log: Vec<ErrorLogEntry>,
    pub error: Option<ErrorEnvelope>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    pub fn new(workflow_id: impl Into<String>, input: Payload, total_steps: usize) -> Self {
        Self {
            id: ExecutionId::new(),
            workflow_id: workflow_id.into(),
            status: ExecutionStatus::Pending,
            input,
            step_results: BTreeMap::new(),
            completed_steps: Vec::new(),
            running_steps: Vec::new(),
            skipped_steps: Vec::new(),
            failed_steps: Vec::new(),
            total_steps,
            error_log: Vec::new(),
            error: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn start(&mut self) {
        self.status = ExecutionStatus::Running;
        self.started_at = Utc::now();
    }

    pub fn step_started(&mut self, step_id: &str) {
        self.running_steps.push(step_id.to_string());
    }

    pub fn step_completed(&mut self, step_id: &str, result: Payload) {
        self.running_steps.retain(|s| s != step_id);
        self.completed_steps.push(step_id.to_string());
        self.step_results.insert(step_id.to_string(), result);
    }

    pub fn step_skipped(&mut self, step_id: &str) {
        self.skipped_steps.push(step_id.to_string());
    }

    pub fn step_failed(&mut self, step_id: &str, message: impl Into<String>) {
        self.running_steps.retain(|s| s != step_id);
        self.failed_steps.push(step_id.to_string());
        self.log_error(Some(step_id), message);
    }

    pub fn log_error(&mut self, step_id: Option<&str>, message: impl Into<String>) {
        self.error_log.push(ErrorLogEntry {
            timestamp: Utc::now(),
            step_id: step_id.map(str::to_string),
            message: message.into(),
        });
    }

    pub fn finish(&mut self, status: ExecutionStatus, error: Option<ErrorEnvelope>) {
        self.status = status;
        self.running_steps.clear();
        if let Some(error) = &error {
            self.log_error(None, error.message.clone());
        }
        self.error = error;
        self.ended_at = Some(Utc::now());
    }

    /// Seconds between start and end, or until now while still running.
    pub fn duration(&self) -> f64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as f64 / 1000.0
    }

    pub fn progress_percentage(&self) -> f64 {
        if self.total_steps == 0 {
            return 0.0;
        }
        let done = self.completed_steps.len() + self.skipped_steps.len() + self.failed_steps.len();
        (done as f64 / self.total_steps as f64 * 100.0).min(100.0)
    }

    pub fn run_result(&self) -> WorkflowRunResult {
        WorkflowRunResult {
            workflow_completed: self.status == ExecutionStatus::Completed,
            steps_executed: self.completed_steps.len(),
            step_results: self.step_results.clone(),
            skipped_steps: self.skipped_steps.clone(),
            failed_steps: self.failed_steps.clone(),
        }
    }

    pub fn report(&self) -> ExecutionReport {
        ExecutionReport {
            execution_id: self.id,
            workflow_id: self.workflow_id.clone(),
            status: self.status,
            result: self.run_result(),
            error: self.error.clone(),
            duration: self.duration(),
            error_log: self.error_log.clone(),
        }
    }

    pub fn status_view(&self) -> ExecutionStatusView {
        ExecutionStatusView {
            execution_id: self.id,
            workflow_id: self.workflow_id.clone(),
            status: self.status,
            current_step: self.running_steps.last().cloned(),
            running_steps: self.running_steps.clone(),
            completed_steps: self.completed_steps.clone(),
            total_steps: self.total_steps,
            progress_percentage: self.progress_percentage(),
            started_at: self.started_at,
            ended_at: self.ended_at,
            errors: self.error_log.clone(),
        }
    }

    pub fn history_entry(&self) -> HistoryEntry {
        let result_summary = match self.status {
            ExecutionStatus::Completed => format!(
                "{} of {} steps completed",
                self.completed_steps.len(),
                self.total_steps
            ),
            _ => match &self.error {
                Some(error) => error.message.clone(),
                None => self.status.to_string(),
            },
        };

        HistoryEntry {
            execution_id: self.id,
            workflow_id: self.workflow_id.clone(),
            status: self.status,
            start_time: self.started_at,
            end_time: self.ended_at,
            duration: self.ended_at.map(|_| self.duration()),
            steps_completed: self.completed_steps.len(),
            result_summary,
            error_count: self.error_log.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_counts_every_settled_step() {
        let mut exec = WorkflowExecution::new("wf", Payload::new(), 4);
        exec.start();
        exec.step_started("a");
        exec.step_completed("a", Payload::new());
        exec.step_skipped("b");
        assert_eq!(exec.progress_percentage(), 50.0);

        exec.step_started("c");
        let view = exec.status_view();
        assert_eq!(view.current_step.as_deref(), Some("c"));
        assert_eq!(view.status, ExecutionStatus::Running);
    }

    #[test]
    fn finishing_with_error_logs_it() {
        let mut exec = WorkflowExecution::new("wf", Payload::new(), 1);
        exec.start();
        exec.finish(
            ExecutionStatus::Failed,
            Some(ErrorEnvelope {
                code: "step_failed".into(),
                message: "boom".into(),
            }),
        );

        let report = exec.report();
        assert!(!report.result.workflow_completed);
        assert_eq!(report.error_log.len(), 1);

        let entry = exec.history_entry();
        assert_eq!(entry.result_summary, "boom");
        assert_eq!(entry.error_count, 1);
        assert!(entry.duration.is_some());
    }

    #[test]
    fn execution_id_parses_from_string() {
        let id = ExecutionId::new();
        let parsed: ExecutionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
