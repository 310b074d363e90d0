// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::execution::ExecutionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentLifecycleEvent {
    AgentStarted {
        agent_id: String,
        instance_id: Uuid,
        started_at: DateTime<Utc>,
    },
    AgentStartFailed {
        agent_id: String,
        reason: String,
        failed_at: DateTime<Utc>,
    },
    AgentStopped {
        agent_id: String,
        instance_id: Uuid,
        stopped_at: DateTime<Utc>,
    },
    AgentRemoved {
        agent_id: String,
        removed_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkflowEvent {
    ExecutionStarted {
        execution_id: ExecutionId,
        workflow_id: String,
        parallel: bool,
        started_at: DateTime<Utc>,
    },
    StepStarted {
        execution_id: ExecutionId,
        step_id: String,
        agent_id: String,
        attempt: u32,
        started_at: DateTime<Utc>,
    },
    StepCompleted {
        execution_id: ExecutionId,
        step_id: String,
        completed_at: DateTime<Utc>,
    },
    StepRetrying {
        execution_id: ExecutionId,
        step_id: String,
        attempt: u32,
        error: String,
    },
    StepFailed {
        execution_id: ExecutionId,
        step_id: String,
        error: String,
        failed_at: DateTime<Utc>,
    },
    StepSkipped {
        execution_id: ExecutionId,
        step_id: String,
        reason: String,
    },
    ExecutionPaused {
        execution_id: ExecutionId,
        paused_at: DateTime<Utc>,
    },
    ExecutionResumed {
        execution_id: ExecutionId,
        resumed_at: DateTime<Utc>,
    },
    ExecutionCompleted {
        execution_id: ExecutionId,
        workflow_id: String,
        steps_executed: usize,
        completed_at: DateTime<Utc>,
    },
    ExecutionFailed {
        execution_id: ExecutionId,
        workflow_id: String,
        error: String,
        failed_at: DateTime<Utc>,
    },
    ExecutionCancelled {
        execution_id: ExecutionId,
        cancelled_at: DateTime<Utc>,
    },
}

impl WorkflowEvent {
    pub fn execution_id(&self) -> ExecutionId {
        match self {
            WorkflowEvent::ExecutionStarted { execution_id, .. }
            | WorkflowEvent::StepStarted { execution_id, .. }
            | WorkflowEvent::StepCompleted { execution_id, .. }
            | WorkflowEvent::StepRetrying { execution_id, .. }
            | WorkflowEvent::StepFailed { execution_id, .. }
            | WorkflowEvent::StepSkipped { execution_id, .. }
            | WorkflowEvent::ExecutionPaused { execution_id, .. }
            | WorkflowEvent::ExecutionResumed { execution_id, .. }
            | WorkflowEvent::ExecutionCompleted { execution_id, .. }
            | WorkflowEvent::ExecutionFailed { execution_id, .. }
            | WorkflowEvent::ExecutionCancelled { execution_id, .. } => *execution_id,
        }
    }

    /// True for the last event an execution emits.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowEvent::ExecutionCompleted { .. }
                | WorkflowEvent::ExecutionFailed { .. }
                | WorkflowEvent::ExecutionCancelled { .. }
        )
    }
}
