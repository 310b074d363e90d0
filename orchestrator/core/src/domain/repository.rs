// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for workflow definitions and execution records,
//! defined in the domain layer and implemented in
//! `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `WorkflowRepository` | `WorkflowDefinition` | `InMemoryWorkflowRepository` |
//! | `ExecutionRepository` | `WorkflowExecution` | `InMemoryExecutionRepository` |

use crate::domain::execution::{ExecutionId, WorkflowExecution};
use crate::domain::workflow::WorkflowDefinition;
use async_trait::async_trait;

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Save a definition, replacing any previous one with the same id.
    async fn save(&self, workflow: &WorkflowDefinition) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<WorkflowDefinition>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<WorkflowDefinition>, RepositoryError>;

    async fn delete(&self, id: &str) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Save a snapshot of an execution (create or update).
    async fn save(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError>;

    async fn find_by_id(
        &self,
        id: ExecutionId,
    ) -> Result<Option<WorkflowExecution>, RepositoryError>;

    /// Executions, newest first, optionally restricted to one workflow.
    async fn list(
        &self,
        workflow_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}
