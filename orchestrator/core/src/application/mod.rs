// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod communicator;
pub mod orchestration_endpoint;
pub mod registry;
pub mod workflow_engine;

pub use orchestration_endpoint::{OrchestrationCommand, OrchestrationEndpoint, ORCHESTRATOR_AGENT_ID};
pub use workflow_engine::{substitute_context, WorkflowSummary};
