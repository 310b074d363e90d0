// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Workflow Engine Application Service
//!
//! Drives workflow executions against the agents held by the
//! [`AgentRegistry`].
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Validate definitions, run executions, expose run controls
//! - **Dependencies:** Domain (Workflow, Execution), Application (Registry),
//!   Infrastructure (Repositories, EventBus, Parser)
//!
//! # Execution Modes
//!
//! ```text
//! sequential:  for step in declaration order {
//!                  checkpoint (pause / cancel)
//!                  skip if a dependency has no result
//!                  skip if the condition is false
//!                  run step, store result under {step_id}_result
//!              }
//!
//! parallel:    loop {
//!                  prune steps blocked by a failed or skipped dependency
//!                  launch every ready step (priority order)
//!                  nothing ready and nothing in flight -> deadlock
//!                  wait for a completion or a control change
//!              }
//! ```
//!
//! Every step attempt runs under the step timeout; a step is tried exactly
//! `retry_count` times with a fixed backoff in between. The whole run is
//! bounded by the workflow timeout.
//!
//! Steps run on their own tasks. When a run ends early (stop policy,
//! workflow timeout) the steps still in flight finish in the background and
//! their results are discarded.

use crate::application::registry::{AgentRegistry, RegistryError};
use crate::domain::config::EngineConfig;
use crate::domain::events::WorkflowEvent;
use crate::domain::execution::{
    ErrorEnvelope, ExecutionId, ExecutionReport, ExecutionStatus, ExecutionStatusView,
    HistoryEntry, WorkflowExecution,
};
use crate::domain::message::Payload;
use crate::domain::repository::{ExecutionRepository, WorkflowRepository};
use crate::domain::workflow::{
    result_key, DefinitionError, FailurePolicy, WorkflowDefinition, WorkflowError, WorkflowStep,
    SUBSTITUTION_MARKER,
};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::repositories::{
    InMemoryExecutionRepository, InMemoryWorkflowRepository,
};
use crate::infrastructure::workflow_parser;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    /// Fixed pause between attempts of a failing step.
    pub retry_backoff: Duration,
    /// Default page size for execution history queries.
    pub history_limit: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            retry_backoff: config.retry_backoff,
            history_limit: config.history_limit,
        }
    }
}

/// Caller-driven control signal observed by a running execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunControl {
    Running,
    Paused,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub step_count: usize,
    pub parallel_execution: bool,
    pub agents: Vec<String>,
}

impl From<&WorkflowDefinition> for WorkflowSummary {
    fn from(definition: &WorkflowDefinition) -> Self {
        Self {
            id: definition.id.clone(),
            name: definition.name.clone(),
            description: definition.description.clone(),
            step_count: definition.steps.len(),
            parallel_execution: definition.parallel_execution,
            agents: definition.agent_ids().into_iter().map(str::to_string).collect(),
        }
    }
}

struct ActiveExecution {
    control: watch::Sender<RunControl>,
    record: Arc<RwLock<WorkflowExecution>>,
}

// An execution that has been recorded and announced but not yet driven.
struct Prepared {
    definition: WorkflowDefinition,
    execution_id: ExecutionId,
    record: Arc<RwLock<WorkflowExecution>>,
    control: watch::Receiver<RunControl>,
}

enum RunOutcome {
    Completed,
    Failed(WorkflowError),
    Cancelled,
}

// ============================================================================
// Application Service: WorkflowEngine
// ============================================================================

pub struct WorkflowEngine {
    registry: Arc<AgentRegistry>,
    workflows: Arc<dyn WorkflowRepository>,
    executions: Arc<dyn ExecutionRepository>,
    event_bus: Option<EventBus>,
    settings: EngineSettings,
    active: Mutex<HashMap<ExecutionId, ActiveExecution>>,
}

impl WorkflowEngine {
    pub fn new(
        registry: Arc<AgentRegistry>,
        workflows: Arc<dyn WorkflowRepository>,
        executions: Arc<dyn ExecutionRepository>,
    ) -> Self {
        Self {
            registry,
            workflows,
            executions,
            event_bus: None,
            settings: EngineSettings::default(),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Engine backed by process-local repositories.
    pub fn in_memory(registry: Arc<AgentRegistry>) -> Self {
        Self::new(
            registry,
            Arc::new(InMemoryWorkflowRepository::new()),
            Arc::new(InMemoryExecutionRepository::new()),
        )
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    fn emit(&self, event: WorkflowEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish_workflow_event(event);
        }
    }

    async fn persist(&self, record: &RwLock<WorkflowExecution>) {
        let snapshot = record.read().clone();
        if let Err(e) = self.executions.save(&snapshot).await {
            warn!(execution_id = %snapshot.id, error = %e, "Failed to persist workflow execution");
        }
    }

    // ========================================================================
    // Workflow Management
    // ========================================================================

    /// Structural validation plus a check that every step targets a
    /// registered agent.
    pub fn check_definition(&self, definition: &WorkflowDefinition) -> Result<(), WorkflowError> {
        definition.validate()?;
        if let Some(step) = definition
            .steps
            .iter()
            .find(|s| !self.registry.is_registered(&s.agent_id))
        {
            return Err(DefinitionError::UnknownAgent {
                step_id: step.id.clone(),
                agent_id: step.agent_id.clone(),
            }
            .into());
        }
        Ok(())
    }

    /// Validate and store a definition, replacing any with the same id.
    pub async fn create_workflow(&self, definition: WorkflowDefinition) -> Result<String, WorkflowError> {
        self.check_definition(&definition)?;
        self.workflows.save(&definition).await?;

        info!(
            workflow_id = %definition.id,
            steps = definition.steps.len(),
            parallel = definition.parallel_execution,
            "Workflow registered"
        );
        Ok(definition.id)
    }

    pub async fn get_workflow(&self, workflow_id: &str) -> Result<WorkflowDefinition, WorkflowError> {
        self.workflows
            .find_by_id(workflow_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()))
    }

    pub async fn remove_workflow(&self, workflow_id: &str) -> Result<(), WorkflowError> {
        self.get_workflow(workflow_id).await?;
        self.workflows.delete(workflow_id).await?;
        info!(workflow_id = %workflow_id, "Workflow removed");
        Ok(())
    }

    /// Registered workflows sorted by id.
    pub async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>, WorkflowError> {
        let mut summaries: Vec<WorkflowSummary> = self
            .workflows
            .list_all()
            .await?
            .iter()
            .map(WorkflowSummary::from)
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(summaries)
    }

    /// Register the bundled workflow manifests. Returns their ids.
    pub async fn install_default_workflows(&self) -> anyhow::Result<Vec<String>> {
        let mut ids = Vec::new();
        for definition in workflow_parser::builtin_workflows()? {
            ids.push(self.create_workflow(definition).await?);
        }
        Ok(ids)
    }

    // ========================================================================
    // Workflow Execution
    // ========================================================================

    /// Run a workflow to completion.
    ///
    /// `Err` is returned only when the execution could not be started (unknown
    /// workflow, invalid definition). Step failures, timeouts and cancellation
    /// are reported through the returned [`ExecutionReport`].
    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        execution_data: Payload,
    ) -> Result<ExecutionReport, WorkflowError> {
        let prepared = self.prepare(workflow_id, execution_data).await?;
        Ok(self.run_prepared(prepared).await)
    }

    /// Start a workflow on a background task and return its execution id
    /// immediately, together with a handle resolving to the final report.
    pub async fn start_workflow(
        self: &Arc<Self>,
        workflow_id: &str,
        execution_data: Payload,
    ) -> Result<(ExecutionId, JoinHandle<ExecutionReport>), WorkflowError> {
        let prepared = self.prepare(workflow_id, execution_data).await?;
        let execution_id = prepared.execution_id;
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move { engine.run_prepared(prepared).await });
        Ok((execution_id, handle))
    }

    async fn prepare(
        &self,
        workflow_id: &str,
        execution_data: Payload,
    ) -> Result<Prepared, WorkflowError> {
        let definition = self.get_workflow(workflow_id).await?;
        self.check_definition(&definition)?;

        let mut execution =
            WorkflowExecution::new(&definition.id, execution_data, definition.steps.len());
        execution.start();
        let execution_id = execution.id;
        let started_at = execution.started_at;

        let (control_tx, control_rx) = watch::channel(RunControl::Running);
        let record = Arc::new(RwLock::new(execution));
        self.active.lock().insert(
            execution_id,
            ActiveExecution {
                control: control_tx,
                record: record.clone(),
            },
        );
        self.persist(&record).await;

        info!(
            execution_id = %execution_id,
            workflow_id = %definition.id,
            parallel = definition.parallel_execution,
            "Starting workflow execution"
        );
        self.emit(WorkflowEvent::ExecutionStarted {
            execution_id,
            workflow_id: definition.id.clone(),
            parallel: definition.parallel_execution,
            started_at,
        });

        Ok(Prepared {
            definition,
            execution_id,
            record,
            control: control_rx,
        })
    }

    async fn run_prepared(&self, prepared: Prepared) -> ExecutionReport {
        let Prepared {
            definition,
            execution_id,
            record,
            control,
        } = prepared;

        let context = record.read().input.clone();
        let mut run = Run {
            engine: self,
            definition: &definition,
            execution_id,
            record: record.clone(),
            control,
            context,
        };

        let mut outcome = match tokio::time::timeout(definition.timeout, run.drive()).await {
            Ok(outcome) => outcome,
            Err(_) => RunOutcome::Failed(WorkflowError::WorkflowTimeout {
                workflow_id: definition.id.clone(),
                timeout: definition.timeout,
            }),
        };
        if matches!(outcome, RunOutcome::Completed) && run.cancel_requested() {
            outcome = RunOutcome::Cancelled;
        }
        drop(run);

        self.finalize(&definition, execution_id, &record, outcome).await
    }

    async fn finalize(
        &self,
        definition: &WorkflowDefinition,
        execution_id: ExecutionId,
        record: &Arc<RwLock<WorkflowExecution>>,
        outcome: RunOutcome,
    ) -> ExecutionReport {
        let (status, error) = match &outcome {
            RunOutcome::Completed => (ExecutionStatus::Completed, None),
            RunOutcome::Cancelled => (ExecutionStatus::Cancelled, None),
            RunOutcome::Failed(err) => (ExecutionStatus::Failed, Some(ErrorEnvelope::from(err))),
        };

        let report = {
            let mut execution = record.write();
            execution.finish(status, error);
            execution.report()
        };
        self.persist(record).await;
        self.active.lock().remove(&execution_id);

        let now = Utc::now();
        match outcome {
            RunOutcome::Completed => {
                info!(
                    execution_id = %execution_id,
                    workflow_id = %definition.id,
                    steps_executed = report.result.steps_executed,
                    duration = report.duration,
                    "Workflow execution completed"
                );
                self.emit(WorkflowEvent::ExecutionCompleted {
                    execution_id,
                    workflow_id: definition.id.clone(),
                    steps_executed: report.result.steps_executed,
                    completed_at: now,
                });
            }
            RunOutcome::Cancelled => {
                info!(execution_id = %execution_id, workflow_id = %definition.id, "Workflow execution cancelled");
                self.emit(WorkflowEvent::ExecutionCancelled {
                    execution_id,
                    cancelled_at: now,
                });
            }
            RunOutcome::Failed(err) => {
                warn!(
                    execution_id = %execution_id,
                    workflow_id = %definition.id,
                    code = err.code(),
                    error = %err,
                    "Workflow execution failed"
                );
                self.emit(WorkflowEvent::ExecutionFailed {
                    execution_id,
                    workflow_id: definition.id.clone(),
                    error: err.to_string(),
                    failed_at: now,
                });
            }
        }

        report
    }

    /// Run one step on its own task. Dropping the handle detaches the step,
    /// so an aborted or timed-out run never interrupts a step mid-call.
    fn spawn_step(
        &self,
        execution_id: ExecutionId,
        step: &WorkflowStep,
        context: Payload,
    ) -> JoinHandle<Result<Payload, WorkflowError>> {
        let runner = StepRunner {
            registry: self.registry.clone(),
            event_bus: self.event_bus.clone(),
            retry_backoff: self.settings.retry_backoff,
        };
        let step = step.clone();
        tokio::spawn(async move { runner.execute(execution_id, &step, &context).await })
    }

    // ========================================================================
    // Run Controls
    // ========================================================================

    fn active_record(
        &self,
        execution_id: ExecutionId,
    ) -> Option<(Arc<RwLock<WorkflowExecution>>, watch::Sender<RunControl>)> {
        self.active
            .lock()
            .get(&execution_id)
            .map(|a| (a.record.clone(), a.control.clone()))
    }

    // Finished executions are known but can no longer change state.
    async fn inactive_error(&self, execution_id: ExecutionId, action: &str) -> WorkflowError {
        match self.executions.find_by_id(execution_id).await {
            Ok(Some(execution)) => WorkflowError::InvalidState {
                action: action.to_string(),
                status: execution.status.to_string(),
            },
            Ok(None) => WorkflowError::ExecutionNotFound(execution_id.to_string()),
            Err(e) => e.into(),
        }
    }

    /// Stop launching new steps. Steps already running finish normally.
    pub async fn pause_workflow(&self, execution_id: ExecutionId) -> Result<(), WorkflowError> {
        let Some((record, control)) = self.active_record(execution_id) else {
            return Err(self.inactive_error(execution_id, "pause").await);
        };
        {
            let mut execution = record.write();
            if execution.status != ExecutionStatus::Running {
                return Err(WorkflowError::InvalidState {
                    action: "pause".to_string(),
                    status: execution.status.to_string(),
                });
            }
            execution.status = ExecutionStatus::Paused;
        }
        control.send_replace(RunControl::Paused);
        self.persist(&record).await;

        info!(execution_id = %execution_id, "Workflow execution paused");
        self.emit(WorkflowEvent::ExecutionPaused {
            execution_id,
            paused_at: Utc::now(),
        });
        Ok(())
    }

    pub async fn resume_workflow(&self, execution_id: ExecutionId) -> Result<(), WorkflowError> {
        let Some((record, control)) = self.active_record(execution_id) else {
            return Err(self.inactive_error(execution_id, "resume").await);
        };
        {
            let mut execution = record.write();
            if execution.status != ExecutionStatus::Paused {
                return Err(WorkflowError::InvalidState {
                    action: "resume".to_string(),
                    status: execution.status.to_string(),
                });
            }
            execution.status = ExecutionStatus::Running;
        }
        control.send_replace(RunControl::Running);
        self.persist(&record).await;

        info!(execution_id = %execution_id, "Workflow execution resumed");
        self.emit(WorkflowEvent::ExecutionResumed {
            execution_id,
            resumed_at: Utc::now(),
        });
        Ok(())
    }

    /// Cancel a running or paused execution. In-flight steps are allowed to
    /// finish; nothing new is launched.
    pub async fn cancel_workflow(&self, execution_id: ExecutionId) -> Result<(), WorkflowError> {
        let Some((record, control)) = self.active_record(execution_id) else {
            return Err(self.inactive_error(execution_id, "cancel").await);
        };
        {
            let mut execution = record.write();
            if !matches!(
                execution.status,
                ExecutionStatus::Running | ExecutionStatus::Paused
            ) {
                return Err(WorkflowError::InvalidState {
                    action: "cancel".to_string(),
                    status: execution.status.to_string(),
                });
            }
            execution.status = ExecutionStatus::Cancelled;
        }
        control.send_replace(RunControl::Cancelled);
        self.persist(&record).await;

        info!(execution_id = %execution_id, "Workflow execution cancellation requested");
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn get_workflow_status(
        &self,
        execution_id: ExecutionId,
    ) -> Result<ExecutionStatusView, WorkflowError> {
        if let Some((record, _)) = self.active_record(execution_id) {
            return Ok(record.read().status_view());
        }
        self.executions
            .find_by_id(execution_id)
            .await?
            .map(|execution| execution.status_view())
            .ok_or_else(|| WorkflowError::ExecutionNotFound(execution_id.to_string()))
    }

    /// Executions newest first, optionally restricted to one workflow.
    pub async fn get_execution_history(
        &self,
        workflow_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, WorkflowError> {
        Ok(self
            .executions
            .list(workflow_id, limit)
            .await?
            .iter()
            .map(WorkflowExecution::history_entry)
            .collect())
    }

    pub fn active_executions(&self) -> Vec<ExecutionId> {
        self.active.lock().keys().copied().collect()
    }
}

// ============================================================================
// Context substitution
// ============================================================================

/// Replace every `from_<step>` string in `task` with the result stored under
/// `<step>_result`, leaving it untouched when no such result exists.
/// Nested objects and arrays are rewritten too.
pub fn substitute_context(task: &Payload, context: &Payload) -> Payload {
    task.iter()
        .map(|(key, value)| (key.clone(), substitute_value(value, context)))
        .collect()
}

fn substitute_value(value: &Value, context: &Payload) -> Value {
    match value {
        Value::String(s) => s
            .strip_prefix(SUBSTITUTION_MARKER)
            .and_then(|step_id| context.get(&result_key(step_id)))
            .cloned()
            .unwrap_or_else(|| value.clone()),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute_value(v, context)).collect()),
        Value::Object(map) => Value::Object(substitute_context(map, context)),
        other => other.clone(),
    }
}

// ============================================================================
// StepRunner: what a detached step task carries
// ============================================================================

#[derive(Clone)]
struct StepRunner {
    registry: Arc<AgentRegistry>,
    event_bus: Option<EventBus>,
    retry_backoff: Duration,
}

impl StepRunner {
    fn emit(&self, event: WorkflowEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish_workflow_event(event);
        }
    }

    /// Run one step to success or until its attempts are exhausted.
    async fn execute(
        &self,
        execution_id: ExecutionId,
        step: &WorkflowStep,
        context: &Payload,
    ) -> Result<Payload, WorkflowError> {
        let input = substitute_context(&step.task, context);
        let attempts = step.attempts();
        let mut timed_out = false;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            self.emit(WorkflowEvent::StepStarted {
                execution_id,
                step_id: step.id.clone(),
                agent_id: step.agent_id.clone(),
                attempt,
                started_at: Utc::now(),
            });

            let result = tokio::time::timeout(step.timeout, async {
                let agent = self.registry.get_agent(&step.agent_id, true).await?;
                Ok::<_, RegistryError>(agent.execute(input.clone()).await?)
            })
            .await;

            match result {
                Ok(Ok(output)) => {
                    debug!(execution_id = %execution_id, step_id = %step.id, attempt, "Step attempt succeeded");
                    return Ok(output.result);
                }
                Ok(Err(RegistryError::NotFound(agent_id))) => {
                    return Err(DefinitionError::UnknownAgent {
                        step_id: step.id.clone(),
                        agent_id,
                    }
                    .into());
                }
                Ok(Err(e)) => {
                    timed_out = false;
                    last_error = e.to_string();
                }
                Err(_) => {
                    timed_out = true;
                    last_error = format!("timed out after {:?}", step.timeout);
                }
            }

            if attempt < attempts {
                warn!(
                    execution_id = %execution_id,
                    step_id = %step.id,
                    attempt,
                    attempts,
                    error = %last_error,
                    "Step attempt failed, retrying"
                );
                self.emit(WorkflowEvent::StepRetrying {
                    execution_id,
                    step_id: step.id.clone(),
                    attempt,
                    error: last_error.clone(),
                });
                tokio::time::sleep(self.retry_backoff).await;
            }
        }

        Err(if timed_out {
            WorkflowError::StepTimeout {
                step_id: step.id.clone(),
                attempts,
                timeout: step.timeout,
            }
        } else {
            WorkflowError::StepFailed {
                step_id: step.id.clone(),
                attempts,
                message: last_error,
            }
        })
    }
}

/// Await a spawned step, turning a panicked task into a step failure.
async fn join_step(
    step: &WorkflowStep,
    handle: JoinHandle<Result<Payload, WorkflowError>>,
) -> Result<Payload, WorkflowError> {
    match handle.await {
        Ok(outcome) => outcome,
        Err(e) => Err(WorkflowError::StepFailed {
            step_id: step.id.clone(),
            attempts: step.attempts(),
            message: format!("step task ended abnormally: {}", e),
        }),
    }
}

// ============================================================================
// Run: state owned by the task driving one execution
// ============================================================================

struct Run<'a> {
    engine: &'a WorkflowEngine,
    definition: &'a WorkflowDefinition,
    execution_id: ExecutionId,
    record: Arc<RwLock<WorkflowExecution>>,
    control: watch::Receiver<RunControl>,
    context: Payload,
}

enum Wake<'a> {
    Finished(&'a WorkflowStep, Result<Payload, WorkflowError>),
    Control,
    ControlClosed,
}

fn launch<'a>(
    engine: &WorkflowEngine,
    execution_id: ExecutionId,
    step: &'a WorkflowStep,
    context: Payload,
) -> impl Future<Output = (&'a WorkflowStep, Result<Payload, WorkflowError>)> + Send + 'a {
    let handle = engine.spawn_step(execution_id, step, context);
    async move { (step, join_step(step, handle).await) }
}

impl<'a> Run<'a> {
    async fn drive(&mut self) -> RunOutcome {
        if self.definition.parallel_execution {
            self.run_parallel().await
        } else {
            self.run_sequential().await
        }
    }

    fn cancel_requested(&self) -> bool {
        let control = *self.control.borrow();
        control == RunControl::Cancelled
    }

    /// Wait out a pause. Returns false once the run has been cancelled.
    async fn checkpoint(&mut self) -> bool {
        loop {
            let control = *self.control.borrow_and_update();
            match control {
                RunControl::Running => return true,
                RunControl::Cancelled => return false,
                RunControl::Paused => {
                    if self.control.changed().await.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    async fn run_sequential(&mut self) -> RunOutcome {
        let definition = self.definition;
        let mut completed: HashSet<&str> = HashSet::new();

        for step in &definition.steps {
            if !self.checkpoint().await {
                return RunOutcome::Cancelled;
            }

            if let Some(missing) = step
                .dependencies
                .iter()
                .find(|d| !completed.contains(d.as_str()))
            {
                self.skip(step, format!("dependency '{}' has no result", missing))
                    .await;
                continue;
            }

            match self.guard(step) {
                Ok(true) => {}
                Ok(false) => {
                    self.skip(step, "condition not met".to_string()).await;
                    continue;
                }
                Err(err) => {
                    if let Some(outcome) = self.fail(step, err).await {
                        return outcome;
                    }
                    continue;
                }
            }

            self.begin(step);
            let handle = self
                .engine
                .spawn_step(self.execution_id, step, self.context.clone());
            match join_step(step, handle).await {
                Ok(result) => {
                    completed.insert(step.id.as_str());
                    self.complete(step, result).await;
                }
                Err(err) => {
                    if let Some(outcome) = self.fail(step, err).await {
                        return outcome;
                    }
                }
            }
        }

        if self.cancel_requested() {
            return RunOutcome::Cancelled;
        }
        RunOutcome::Completed
    }

    async fn run_parallel(&mut self) -> RunOutcome {
        let definition = self.definition;
        let mut pending: Vec<&'a WorkflowStep> = definition.steps.iter().collect();
        let mut completed: HashSet<&'a str> = HashSet::new();
        let mut dropped: HashSet<&'a str> = HashSet::new();
        let mut in_flight = FuturesUnordered::new();
        let mut draining = false;
        let mut control_open = true;

        loop {
            self.prune_blocked(&mut pending, &mut dropped).await;

            let control = *self.control.borrow_and_update();
            if control == RunControl::Cancelled {
                draining = true;
            }

            if control == RunControl::Running {
                let (mut ready, waiting): (Vec<&'a WorkflowStep>, Vec<&'a WorkflowStep>) =
                    pending.into_iter().partition(|s| {
                        s.dependencies.iter().all(|d| completed.contains(d.as_str()))
                    });
                pending = waiting;
                ready.sort_by(|a, b| b.priority.cmp(&a.priority));

                let mut settled = false;
                for step in ready {
                    match self.guard(step) {
                        Ok(true) => {
                            self.begin(step);
                            in_flight.push(launch(
                                self.engine,
                                self.execution_id,
                                step,
                                self.context.clone(),
                            ));
                        }
                        Ok(false) => {
                            self.skip(step, "condition not met".to_string()).await;
                            dropped.insert(step.id.as_str());
                            settled = true;
                        }
                        Err(err) => {
                            if let Some(outcome) = self.fail(step, err).await {
                                return outcome;
                            }
                            dropped.insert(step.id.as_str());
                            settled = true;
                        }
                    }
                }
                if settled {
                    continue;
                }
            }

            if in_flight.is_empty() {
                if draining {
                    return RunOutcome::Cancelled;
                }
                if pending.is_empty() {
                    return RunOutcome::Completed;
                }
                if control == RunControl::Paused {
                    if !control_open || self.control.changed().await.is_err() {
                        return RunOutcome::Cancelled;
                    }
                    continue;
                }
                return RunOutcome::Failed(WorkflowError::DeadlockDetected {
                    pending: pending.iter().map(|s| s.id.clone()).collect(),
                });
            }

            let wake = tokio::select! {
                Some((step, outcome)) = in_flight.next() => Wake::Finished(step, outcome),
                changed = self.control.changed(), if control_open && !draining => {
                    if changed.is_ok() { Wake::Control } else { Wake::ControlClosed }
                }
                else => Wake::Control,
            };

            match wake {
                Wake::Finished(step, Ok(result)) => {
                    completed.insert(step.id.as_str());
                    self.complete(step, result).await;
                }
                Wake::Finished(step, Err(err)) => {
                    dropped.insert(step.id.as_str());
                    let abort = self.fail(step, err).await;
                    if let (Some(outcome), false) = (abort, draining) {
                        return outcome;
                    }
                }
                Wake::Control => {}
                Wake::ControlClosed => control_open = false,
            }
        }
    }

    /// Skip, transitively, every pending step that depends on a step which
    /// failed or was skipped.
    async fn prune_blocked(
        &mut self,
        pending: &mut Vec<&'a WorkflowStep>,
        dropped: &mut HashSet<&'a str>,
    ) {
        loop {
            let (blocked, rest): (Vec<&'a WorkflowStep>, Vec<&'a WorkflowStep>) =
                pending.drain(..).partition(|s| {
                    s.dependencies.iter().any(|d| dropped.contains(d.as_str()))
                });
            *pending = rest;
            if blocked.is_empty() {
                return;
            }
            for step in blocked {
                self.skip(step, "a dependency did not complete".to_string())
                    .await;
                dropped.insert(step.id.as_str());
            }
        }
    }

    fn guard(&self, step: &WorkflowStep) -> Result<bool, WorkflowError> {
        match &step.condition {
            None => Ok(true),
            Some(condition) => {
                condition
                    .evaluate(&self.context)
                    .map_err(|source| WorkflowError::ConditionFailed {
                        step_id: step.id.clone(),
                        source,
                    })
            }
        }
    }

    fn begin(&self, step: &WorkflowStep) {
        self.record.write().step_started(&step.id);
        debug!(
            execution_id = %self.execution_id,
            step_id = %step.id,
            agent_id = %step.agent_id,
            "Step started"
        );
    }

    async fn complete(&mut self, step: &WorkflowStep, result: Payload) {
        self.record.write().step_completed(&step.id, result.clone());
        self.context
            .insert(result_key(&step.id), Value::Object(result));
        self.engine.persist(&self.record).await;

        info!(execution_id = %self.execution_id, step_id = %step.id, "Step completed");
        self.engine.emit(WorkflowEvent::StepCompleted {
            execution_id: self.execution_id,
            step_id: step.id.clone(),
            completed_at: Utc::now(),
        });
    }

    async fn skip(&mut self, step: &WorkflowStep, reason: String) {
        self.record.write().step_skipped(&step.id);
        self.engine.persist(&self.record).await;

        info!(execution_id = %self.execution_id, step_id = %step.id, reason = %reason, "Step skipped");
        self.engine.emit(WorkflowEvent::StepSkipped {
            execution_id: self.execution_id,
            step_id: step.id.clone(),
            reason,
        });
    }

    /// Record a step failure. Returns the run outcome when the failure ends
    /// the execution.
    async fn fail(&mut self, step: &WorkflowStep, err: WorkflowError) -> Option<RunOutcome> {
        self.record.write().step_failed(&step.id, err.to_string());
        self.engine.persist(&self.record).await;

        warn!(
            execution_id = %self.execution_id,
            step_id = %step.id,
            code = err.code(),
            error = %err,
            "Step failed"
        );
        self.engine.emit(WorkflowEvent::StepFailed {
            execution_id: self.execution_id,
            step_id: step.id.clone(),
            error: err.to_string(),
            failed_at: Utc::now(),
        });

        if err.is_definition() || self.definition.on_failure == FailurePolicy::Stop {
            Some(RunOutcome::Failed(err))
        } else {
            None
        }
    }
}
