// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! In-memory implementations of the repository abstractions defined in the
//! domain layer. State lives for the lifetime of the process.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Store and retrieve workflow definitions and execution records
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)

use crate::domain::execution::{ExecutionId, WorkflowExecution};
use crate::domain::repository::{ExecutionRepository, RepositoryError, WorkflowRepository};
use crate::domain::workflow::WorkflowDefinition;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct InMemoryWorkflowRepository {
    workflows: Arc<RwLock<HashMap<String, WorkflowDefinition>>>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn save(&self, workflow: &WorkflowDefinition) -> Result<(), RepositoryError> {
        self.workflows
            .write()
            .insert(workflow.id.clone(), workflow.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self.workflows.read().get(id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let mut all: Vec<_> = self.workflows.read().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        self.workflows
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryExecutionRepository {
    executions: Arc<RwLock<HashMap<ExecutionId, WorkflowExecution>>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn save(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        self.executions
            .write()
            .insert(execution.id, execution.clone());
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: ExecutionId,
    ) -> Result<Option<WorkflowExecution>, RepositoryError> {
        Ok(self.executions.read().get(&id).cloned())
    }

    async fn list(
        &self,
        workflow_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let mut matching: Vec<_> = self
            .executions
            .read()
            .values()
            .filter(|e| workflow_id.is_none_or(|id| e.workflow_id == id))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        matching.truncate(limit);
        Ok(matching)
    }
}
