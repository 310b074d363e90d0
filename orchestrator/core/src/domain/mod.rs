// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain Layer
//!
//! Messages, agents, workflow definitions and execution records, plus the
//! repository and configuration types they are stored and wired with.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Types, invariants and the configuration manifest

pub mod agent;
pub mod condition;
pub mod config;
pub mod events;
pub mod execution;
pub mod message;
pub mod repository;
pub mod workflow;
