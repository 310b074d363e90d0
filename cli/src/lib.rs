// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Concord CLI library - exposes testable components
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Command handlers, the embedded coordinator and the bundled
//!   demo agents

pub mod commands;
pub mod coordinator;
pub mod demo_agents;
