// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent commands
//!
//! Commands: list, health, exec

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use crate::coordinator::Coordinator;

#[derive(Subcommand)]
pub enum AgentCommand {
    /// List available agents
    List,

    /// Start every agent and report its health
    Health,

    /// Run a single task on an agent
    Exec {
        /// Agent id
        #[arg(value_name = "AGENT_ID")]
        agent_id: String,

        /// Task payload (JSON object)
        #[arg(long, short = 'i', value_name = "JSON")]
        input: Option<String>,

        /// Individual task fields (key=value)
        #[arg(long = "param", short = 'p', value_name = "KEY=VALUE")]
        params: Vec<String>,
    },
}

pub async fn handle_command(command: AgentCommand, config_path: Option<PathBuf>) -> Result<()> {
    let coordinator = Coordinator::load(config_path).await?;
    let outcome = match command {
        AgentCommand::List => list_agents(&coordinator).await,
        AgentCommand::Health => health(&coordinator).await,
        AgentCommand::Exec {
            agent_id,
            input,
            params,
        } => {
            let task = super::parse_input(input.as_deref(), &params)?;
            exec_agent(&coordinator, &agent_id, task).await
        }
    };
    coordinator.shutdown().await;
    outcome
}

async fn list_agents(coordinator: &Coordinator) -> Result<()> {
    let registry = coordinator.registry();
    let ids = registry.available_agents();
    if ids.is_empty() {
        println!("{}", "No agents registered".yellow());
        return Ok(());
    }

    println!("{} agents available:", ids.len());
    println!("{:<24} {:<24} {:<24} {}", "ID", "TITLE", "CATEGORY", "CAPABILITIES");
    for id in ids {
        let agent = registry.get_agent(&id, false).await?;
        let config = agent.config();
        println!(
            "{:<24} {:<24} {:<24} {}",
            id.bold(),
            config.title,
            format!("{:?}", config.category),
            config.capabilities.join(", ").dimmed()
        );
    }
    Ok(())
}

async fn health(coordinator: &Coordinator) -> Result<()> {
    let registry = coordinator.registry();
    for id in registry.available_agents() {
        if let Err(e) = registry.get_agent(&id, true).await {
            println!("{}", format!("✗ {} failed to start: {}", id, e).red());
        }
    }

    let report = registry.health_check().await;
    println!(
        "Registry: {}  ({}/{} agents active)",
        report.registry_status.green(),
        report.active_agents,
        report.total_agents
    );
    for (id, health) in &report.agents {
        let marker = if health.healthy {
            "✓".green()
        } else {
            "✗".red()
        };
        println!(
            "  {} {:<24} {:<12} last activity {}",
            marker,
            id,
            health.status.as_str(),
            health.last_activity.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

async fn exec_agent(
    coordinator: &Coordinator,
    agent_id: &str,
    task: concord_core::domain::message::Payload,
) -> Result<()> {
    let output = coordinator.registry().execute_agent(agent_id, task).await?;
    let mut result = output.result;
    result.remove("_metadata");

    println!("{}", serde_json::to_string_pretty(&result)?);
    println!(
        "{}",
        format!(
            "✓ {} finished in {:.3}s (instance {})",
            output.metadata.agent_id, output.metadata.execution_time, output.metadata.instance_id
        )
        .dimmed()
    );
    Ok(())
}
