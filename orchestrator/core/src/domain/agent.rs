// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent
//!
//! An agent is an independently executing worker that turns a task payload
//! into a result payload. The coordinator only sees it through the
//! [`AgentWorker`] contract; [`Agent`] adds the lifecycle around it.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Agent configuration, lifecycle state machine, execution envelope
//!
//! # Lifecycle
//!
//! ```text
//! initializing ──start ok──▶ ready ◀──▶ running
//!      │                       │
//!  start failed              stop
//!      ▼                       ▼
//!    error                  stopped ──start──▶ initializing
//! ```

use crate::domain::message::Payload;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Initializing,
    Ready,
    Running,
    Error,
    Stopped,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Initializing => "initializing",
            AgentStatus::Ready => "ready",
            AgentStatus::Running => "running",
            AgentStatus::Error => "error",
            AgentStatus::Stopped => "stopped",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, AgentStatus::Ready | AgentStatus::Running)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCategory {
    FinancialAutomation,
    DocumentProcessing,
    BusinessIntelligence,
    #[default]
    ConversationalAi,
    WorkflowOrchestration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_id: String,
    pub title: String,
    #[serde(default)]
    pub category: AgentCategory,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Free-form worker settings.
    #[serde(default)]
    pub settings: Payload,
}

impl AgentConfig {
    /// Minimal configuration derived from the id alone:
    /// `expense_approval` becomes "Expense Approval".
    pub fn default_for(agent_id: &str) -> Self {
        let title = agent_id
            .split('_')
            .filter(|w| !w.is_empty())
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => {
                        first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                    }
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ");

        Self {
            agent_id: agent_id.to_string(),
            title,
            category: AgentCategory::default(),
            capabilities: Vec::new(),
            settings: Payload::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Agent '{agent_id}' is not ready (status: {status})")]
    NotReady { agent_id: String, status: AgentStatus },

    #[error("Invalid input for agent '{agent_id}'")]
    InvalidInput { agent_id: String },

    #[error("Agent '{agent_id}' failed: {message}")]
    ExecutionFailed { agent_id: String, message: String },

    #[error("Agent '{agent_id}' was stopped while executing")]
    Cancelled { agent_id: String },

    #[error("Agent '{agent_id}' failed to start: {reason}")]
    StartFailed { agent_id: String, reason: String },
}

/// The contract every worker satisfies. Only `process` is required.
#[async_trait]
pub trait AgentWorker: Send + Sync {
    /// Prepare the worker. Returning `Ok(false)` marks the start as failed.
    async fn initialize(&self, _config: &AgentConfig) -> anyhow::Result<bool> {
        Ok(true)
    }

    fn validate_input(&self, _input: &Payload) -> bool {
        true
    }

    async fn process(&self, input: Payload) -> anyhow::Result<Payload>;

    async fn cleanup(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub agent_id: String,
    pub instance_id: Uuid,
    /// Seconds spent in the worker.
    pub execution_time: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    /// Worker result with the metadata merged in under `_metadata`.
    pub result: Payload,
    pub metadata: ExecutionMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHealth {
    pub status: AgentStatus,
    pub last_activity: DateTime<Utc>,
    pub healthy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub agent_id: String,
    pub title: String,
    pub category: AgentCategory,
    pub capabilities: Vec<String>,
    pub instance_id: Uuid,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub last_error: Option<String>,
}

struct AgentState {
    status: AgentStatus,
    last_activity: DateTime<Utc>,
    in_flight: usize,
    last_error: Option<String>,
    cancel: CancellationToken,
}

// Releases an in-flight slot even when the execute future is dropped early.
struct InFlight<'a> {
    state: &'a Mutex<AgentState>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.in_flight == 0 && state.status == AgentStatus::Running {
            state.status = AgentStatus::Ready;
        }
        state.last_activity = Utc::now();
    }
}

/// A live agent instance: a worker plus its lifecycle state.
pub struct Agent {
    config: AgentConfig,
    instance_id: Uuid,
    created_at: DateTime<Utc>,
    worker: Arc<dyn AgentWorker>,
    state: Mutex<AgentState>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("agent_id", &self.config.agent_id)
            .field("instance_id", &self.instance_id)
            .field("status", &self.status())
            .finish()
    }
}

impl Agent {
    pub fn new(config: AgentConfig, worker: Arc<dyn AgentWorker>) -> Self {
        let now = Utc::now();
        Self {
            config,
            instance_id: Uuid::new_v4(),
            created_at: now,
            worker,
            state: Mutex::new(AgentState {
                status: AgentStatus::Initializing,
                last_activity: now,
                in_flight: 0,
                last_error: None,
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.agent_id
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn status(&self) -> AgentStatus {
        self.state.lock().status
    }

    /// Initialize the worker and move to `ready`. Returns `false` on failure,
    /// leaving the agent in `error`.
    pub async fn start(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.status.is_healthy() {
                return true;
            }
            state.status = AgentStatus::Initializing;
            state.cancel = CancellationToken::new();
            state.last_error = None;
        }

        let outcome = self.worker.initialize(&self.config).await;

        let mut state = self.state.lock();
        state.last_activity = Utc::now();
        match outcome {
            Ok(true) => {
                state.status = AgentStatus::Ready;
                info!(agent_id = %self.config.agent_id, instance_id = %self.instance_id, "Agent started");
                true
            }
            Ok(false) => {
                state.status = AgentStatus::Error;
                state.last_error = Some("initialization declined".to_string());
                warn!(agent_id = %self.config.agent_id, "Agent initialization returned false");
                false
            }
            Err(e) => {
                state.status = AgentStatus::Error;
                state.last_error = Some(e.to_string());
                warn!(agent_id = %self.config.agent_id, error = %e, "Agent initialization failed");
                false
            }
        }
    }

    /// Move to `stopped`, cancel in-flight work and run the worker's cleanup.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            state.status = AgentStatus::Stopped;
            state.last_activity = Utc::now();
            state.cancel.cancel();
        }

        if let Err(e) = self.worker.cleanup().await {
            warn!(agent_id = %self.config.agent_id, error = %e, "Agent cleanup failed");
        }
        info!(agent_id = %self.config.agent_id, instance_id = %self.instance_id, "Agent stopped");
    }

    pub async fn execute(&self, input: Payload) -> Result<AgentOutput, AgentError> {
        let agent_id = self.config.agent_id.clone();

        let cancel = {
            let mut state = self.state.lock();
            if !state.status.is_healthy() {
                return Err(AgentError::NotReady {
                    agent_id,
                    status: state.status,
                });
            }
            if !self.worker.validate_input(&input) {
                return Err(AgentError::InvalidInput { agent_id });
            }
            state.in_flight += 1;
            state.status = AgentStatus::Running;
            state.cancel.clone()
        };

        let in_flight = InFlight { state: &self.state };
        debug!(agent_id = %agent_id, "Executing agent task");
        let started = Instant::now();
        let outcome = tokio::select! {
            result = self.worker.process(input) => result.map_err(|e| AgentError::ExecutionFailed {
                agent_id: agent_id.clone(),
                message: e.to_string(),
            }),
            _ = cancel.cancelled() => Err(AgentError::Cancelled { agent_id: agent_id.clone() }),
        };
        let elapsed = started.elapsed().as_secs_f64();
        drop(in_flight);

        let timestamp = Utc::now();
        if let Err(e) = &outcome {
            self.state.lock().last_error = Some(e.to_string());
        }

        let mut result = outcome?;
        let metadata = ExecutionMetadata {
            agent_id,
            instance_id: self.instance_id,
            execution_time: elapsed,
            timestamp,
        };
        result.insert(
            "_metadata".to_string(),
            json!({
                "agent_id": metadata.agent_id,
                "instance_id": metadata.instance_id.to_string(),
                "execution_time": metadata.execution_time,
                "timestamp": metadata.timestamp.to_rfc3339(),
            }),
        );

        Ok(AgentOutput { result, metadata })
    }

    pub fn health(&self) -> AgentHealth {
        let state = self.state.lock();
        AgentHealth {
            status: state.status,
            last_activity: state.last_activity,
            healthy: state.status.is_healthy(),
        }
    }

    pub fn info(&self) -> AgentInfo {
        let state = self.state.lock();
        AgentInfo {
            agent_id: self.config.agent_id.clone(),
            title: self.config.title.clone(),
            category: self.config.category,
            capabilities: self.config.capabilities.clone(),
            instance_id: self.instance_id,
            status: state.status,
            created_at: self.created_at,
            last_activity: state.last_activity,
            last_error: state.last_error.clone(),
        }
    }
}
