// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod event_bus;
pub mod message_bus;
pub mod repositories;
pub mod workflow_parser;

pub use workflow_parser::{WorkflowParseError, WorkflowParser};
