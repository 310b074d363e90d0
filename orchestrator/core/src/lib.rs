// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Concord Core
//!
//! In-process multi-agent coordination: a priority message bus, request /
//! response correlation for agents, an agent registry, and a workflow engine
//! that runs dependency graphs of agent tasks.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain model, application services and in-memory adapters

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use application::communicator::{AgentCommunicator, CommunicationError};
pub use application::registry::{AgentRegistry, RegistryError};
pub use application::workflow_engine::{EngineSettings, WorkflowEngine};
pub use infrastructure::event_bus::EventBus;
pub use infrastructure::message_bus::MessageBus;
