// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the Concord CLI

pub mod agent;
pub mod config;
pub mod workflow;

pub use self::agent::AgentCommand;
pub use self::config::ConfigCommand;
pub use self::workflow::WorkflowCommand;

use anyhow::{Context, Result};
use concord_core::domain::message::Payload;

/// Merge a JSON object string and `key=value` pairs into one payload.
/// Values are parsed as JSON when possible, otherwise kept as strings.
pub fn parse_input(input_json: Option<&str>, params: &[String]) -> Result<Payload> {
    let mut payload = Payload::new();

    if let Some(json) = input_json {
        let parsed: serde_json::Value = serde_json::from_str(json).context("Invalid JSON input")?;
        match parsed {
            serde_json::Value::Object(map) => payload.extend(map),
            _ => anyhow::bail!("Input must be a JSON object"),
        }
    }

    for param in params {
        let Some((key, value)) = param.split_once('=') else {
            anyhow::bail!("Invalid parameter format: '{}'. Expected 'key=value'", param);
        };
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        payload.insert(key.to_string(), value);
    }

    Ok(payload)
}
