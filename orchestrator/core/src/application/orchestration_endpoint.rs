// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Orchestration Endpoint
//!
//! Exposes the [`WorkflowEngine`] on the message bus so other agents can drive
//! workflows with ordinary task requests.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Translate `task_request` payloads into engine calls and
//!   answer with a `{success, ...}` envelope
//!
//! Requests are tagged by `type`; a request without one is treated as
//! `execute_workflow`.
//!
//! ```json
//! { "type": "execute_workflow", "workflow_id": "expense_processing",
//!   "execution_data": { "expenses": [] } }
//! { "type": "pause_workflow", "execution_id": "4f3c..." }
//! { "type": "get_execution_history", "workflow_id": "contract_review", "limit": 10 }
//! ```

use crate::application::communicator::{AgentCommunicator, CommunicationError};
use crate::application::workflow_engine::WorkflowEngine;
use crate::domain::execution::{ExecutionId, ExecutionStatus};
use crate::domain::message::{Message, MessageType, Payload};
use crate::domain::workflow::{WorkflowDefinition, WorkflowError};
use crate::infrastructure::message_bus::MessageBus;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const ORCHESTRATOR_AGENT_ID: &str = "multi_agent_orchestration";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestrationCommand {
    ExecuteWorkflow {
        workflow_id: String,
        #[serde(default)]
        execution_data: Payload,
    },
    CreateWorkflow {
        workflow: WorkflowDefinition,
    },
    GetWorkflowStatus {
        execution_id: ExecutionId,
    },
    PauseWorkflow {
        execution_id: ExecutionId,
    },
    ResumeWorkflow {
        execution_id: ExecutionId,
    },
    CancelWorkflow {
        execution_id: ExecutionId,
    },
    ListWorkflows,
    GetExecutionHistory {
        #[serde(default)]
        workflow_id: Option<String>,
        #[serde(default)]
        limit: Option<usize>,
    },
}

impl OrchestrationCommand {
    /// Decode a request payload, defaulting the tag to `execute_workflow`.
    pub fn from_payload(payload: &Payload) -> Result<Self, serde_json::Error> {
        let mut payload = payload.clone();
        payload
            .entry("type")
            .or_insert_with(|| json!("execute_workflow"));
        serde_json::from_value(Value::Object(payload))
    }
}

pub struct OrchestrationEndpoint {
    engine: Arc<WorkflowEngine>,
    communicator: Arc<AgentCommunicator>,
}

impl OrchestrationEndpoint {
    pub fn new(engine: Arc<WorkflowEngine>, bus: MessageBus) -> Self {
        Self {
            engine,
            communicator: Arc::new(AgentCommunicator::new(ORCHESTRATOR_AGENT_ID, bus)),
        }
    }

    pub fn communicator(&self) -> &Arc<AgentCommunicator> {
        &self.communicator
    }

    /// Subscribe to the bus and answer requests until `shutdown` fires.
    /// Each request is handled on its own task so a long workflow does not
    /// hold up status queries.
    pub fn spawn(
        self: Arc<Self>,
        shutdown: CancellationToken,
    ) -> Result<JoinHandle<()>, CommunicationError> {
        let mut inbox = self.communicator.initialize()?;
        info!(agent_id = ORCHESTRATOR_AGENT_ID, "Orchestration endpoint listening");

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = inbox.recv() => {
                        let Some(message) = received else { break };
                        if message.message_type != MessageType::TaskRequest {
                            debug!(message_type = ?message.message_type, sender = %message.sender_id, "Ignoring non-request message");
                            continue;
                        }
                        let endpoint = self.clone();
                        tokio::spawn(async move { endpoint.answer(&message).await });
                    }
                }
            }
            self.communicator.cleanup();
            info!(agent_id = ORCHESTRATOR_AGENT_ID, "Orchestration endpoint stopped");
        }))
    }

    async fn answer(&self, request: &Message) {
        let response = self.handle(&request.payload).await;
        if let Err(e) = self.communicator.send_response(request, response) {
            warn!(request_id = %request.id, error = %e, "Failed to send orchestration response");
        }
    }

    /// Execute one command payload and build the response envelope.
    pub async fn handle(&self, payload: &Payload) -> Payload {
        match OrchestrationCommand::from_payload(payload) {
            Ok(command) => self.dispatch(command).await,
            Err(e) => envelope(json!({
                "success": false,
                "error": format!("Invalid request: {}", e),
                "code": "invalid_request",
            })),
        }
    }

    async fn dispatch(&self, command: OrchestrationCommand) -> Payload {
        let engine = &self.engine;
        let outcome: Result<Value, WorkflowError> = match command {
            OrchestrationCommand::ExecuteWorkflow {
                workflow_id,
                execution_data,
            } => match engine.execute_workflow(&workflow_id, execution_data).await {
                Ok(report) => {
                    let completed = report.status == ExecutionStatus::Completed;
                    let mut response = json!({
                        "success": completed,
                        "execution_id": report.execution_id,
                        "status": report.status,
                        "result": report.result,
                        "duration": report.duration,
                    });
                    if let Some(error) = &report.error {
                        response["error"] = json!(error.message);
                        response["code"] = json!(error.code);
                    }
                    return envelope(response);
                }
                Err(e) => Err(e),
            },
            OrchestrationCommand::CreateWorkflow { workflow } => engine
                .create_workflow(workflow)
                .await
                .map(|workflow_id| json!({ "workflow_id": workflow_id })),
            OrchestrationCommand::GetWorkflowStatus { execution_id } => engine
                .get_workflow_status(execution_id)
                .await
                .map(|view| json!({ "execution": view })),
            OrchestrationCommand::PauseWorkflow { execution_id } => engine
                .pause_workflow(execution_id)
                .await
                .map(|_| json!({ "execution_id": execution_id, "status": ExecutionStatus::Paused })),
            OrchestrationCommand::ResumeWorkflow { execution_id } => engine
                .resume_workflow(execution_id)
                .await
                .map(|_| json!({ "execution_id": execution_id, "status": ExecutionStatus::Running })),
            OrchestrationCommand::CancelWorkflow { execution_id } => engine
                .cancel_workflow(execution_id)
                .await
                .map(|_| json!({ "execution_id": execution_id, "status": ExecutionStatus::Cancelled })),
            OrchestrationCommand::ListWorkflows => engine
                .list_workflows()
                .await
                .map(|workflows| json!({ "total": workflows.len(), "workflows": workflows })),
            OrchestrationCommand::GetExecutionHistory { workflow_id, limit } => {
                let limit = limit.unwrap_or(engine.settings().history_limit);
                engine
                    .get_execution_history(workflow_id.as_deref(), limit)
                    .await
                    .map(|history| json!({ "total": history.len(), "history": history }))
            }
        };

        match outcome {
            Ok(data) => {
                let mut response = envelope(data);
                response.insert("success".to_string(), json!(true));
                response
            }
            Err(e) => envelope(json!({
                "success": false,
                "error": e.to_string(),
                "code": e.code(),
            })),
        }
    }
}

fn envelope(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Payload::new();
            map.insert("data".to_string(), other);
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::registry::AgentRegistry;
    use crate::domain::agent::AgentWorker;
    use crate::domain::workflow::WorkflowStep;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl AgentWorker for Echo {
        async fn process(&self, input: Payload) -> anyhow::Result<Payload> {
            Ok(input)
        }
    }

    async fn endpoint() -> (Arc<OrchestrationEndpoint>, MessageBus) {
        let registry = Arc::new(AgentRegistry::new());
        registry.register("echo", |_| Ok(Arc::new(Echo) as Arc<dyn AgentWorker>));
        let engine = Arc::new(WorkflowEngine::in_memory(registry));
        engine
            .create_workflow(WorkflowDefinition::new(
                "single",
                "Single",
                vec![WorkflowStep::new("only", "echo", Payload::new())],
            ))
            .await
            .unwrap();

        let bus = MessageBus::new();
        bus.start();
        (Arc::new(OrchestrationEndpoint::new(engine, bus.clone())), bus)
    }

    fn payload(value: Value) -> Payload {
        envelope(value)
    }

    #[test]
    fn missing_type_defaults_to_execute_workflow() {
        let command =
            OrchestrationCommand::from_payload(&payload(json!({ "workflow_id": "single" })))
                .unwrap();
        assert!(matches!(
            command,
            OrchestrationCommand::ExecuteWorkflow { ref workflow_id, .. } if workflow_id == "single"
        ));
    }

    #[tokio::test]
    async fn unknown_command_is_an_error_envelope() {
        let (endpoint, _bus) = endpoint().await;
        let response = endpoint
            .handle(&payload(json!({ "type": "reticulate_splines" })))
            .await;
        assert_eq!(response["success"], json!(false));
        assert_eq!(response["code"], json!("invalid_request"));
    }

    #[tokio::test]
    async fn unknown_execution_reports_not_found() {
        let (endpoint, _bus) = endpoint().await;
        let response = endpoint
            .handle(&payload(json!({
                "type": "pause_workflow",
                "execution_id": ExecutionId::new(),
            })))
            .await;
        assert_eq!(response["success"], json!(false));
        assert_eq!(response["code"], json!("execution_not_found"));
    }

    #[tokio::test]
    async fn serves_requests_over_the_bus() {
        let (endpoint, bus) = endpoint().await;
        let shutdown = CancellationToken::new();
        let handle = endpoint.clone().spawn(shutdown.clone()).unwrap();

        let client = AgentCommunicator::new("client", bus.clone());
        let _inbox = client.initialize().unwrap();

        let response = client
            .send_request(
                ORCHESTRATOR_AGENT_ID,
                payload(json!({ "type": "execute_workflow", "workflow_id": "single" })),
                Some(Duration::from_secs(5)),
            )
            .await
            .unwrap();
        assert_eq!(response.payload["success"], json!(true));
        assert_eq!(response.payload["status"], json!("completed"));

        let response = client
            .send_request(
                ORCHESTRATOR_AGENT_ID,
                payload(json!({ "type": "list_workflows" })),
                None,
            )
            .await
            .unwrap();
        assert_eq!(response.payload["total"], json!(1));

        shutdown.cancel();
        handle.await.unwrap();
        client.cleanup();
        bus.stop().await;
    }
}
