// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Workflow command implementations
//!
//! # Commands
//!
//! - `concord workflow list` - List loaded workflows
//! - `concord workflow validate <file>` - Parse and validate a workflow manifest
//! - `concord workflow describe <id>` - Show a workflow definition
//! - `concord workflow run <id>` - Execute a workflow on the embedded coordinator

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use concord_core::domain::events::WorkflowEvent;
use concord_core::domain::execution::{ExecutionReport, ExecutionStatus};
use concord_core::domain::message::Payload;
use concord_core::infrastructure::workflow_parser::WorkflowParser;

use crate::coordinator::Coordinator;

#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// List loaded workflows
    List {
        /// Show detailed information
        #[arg(long, short = 'l')]
        long: bool,
    },

    /// Validate a workflow manifest file
    Validate {
        /// Path to workflow manifest YAML file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Show a workflow definition
    Describe {
        /// Workflow id
        #[arg(value_name = "ID")]
        id: String,

        /// Output format (yaml, json)
        #[arg(long, short = 'o', default_value = "yaml")]
        output: String,
    },

    /// Execute a workflow
    Run {
        /// Workflow id
        #[arg(value_name = "ID")]
        id: String,

        /// Execution data (JSON object)
        #[arg(long, short = 'i', value_name = "JSON")]
        input: Option<String>,

        /// Individual parameters (key=value)
        #[arg(long = "param", short = 'p', value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Print step events as they happen
        #[arg(long, short = 'f')]
        follow: bool,

        /// Schedule independent steps concurrently for this run
        #[arg(long)]
        parallel: bool,

        /// Print the full execution report as JSON
        #[arg(long)]
        json: bool,
    },
}

pub async fn handle_command(command: WorkflowCommand, config_path: Option<PathBuf>) -> Result<()> {
    if let WorkflowCommand::Validate { file } = &command {
        return validate_workflow(file, config_path).await;
    }

    let coordinator = Coordinator::load(config_path).await?;
    let outcome = match command {
        WorkflowCommand::List { long } => list_workflows(&coordinator, long).await,
        WorkflowCommand::Describe { id, output } => {
            describe_workflow(&coordinator, &id, &output).await
        }
        WorkflowCommand::Run {
            id,
            input,
            params,
            follow,
            parallel,
            json,
        } => {
            let data = super::parse_input(input.as_deref(), &params)?;
            run_workflow(&coordinator, &id, data, follow, parallel, json).await
        }
        WorkflowCommand::Validate { .. } => Ok(()),
    };
    coordinator.shutdown().await;
    outcome
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn list_workflows(coordinator: &Coordinator, long: bool) -> Result<()> {
    let workflows = coordinator.engine().list_workflows().await?;
    if workflows.is_empty() {
        println!("{}", "No workflows loaded.".yellow());
        return Ok(());
    }

    println!("{}", "Workflows".cyan().bold());
    println!();
    for workflow in workflows {
        if long {
            println!("{}", format!("• {}", workflow.id).green().bold());
            println!("  Name:        {}", workflow.name);
            if !workflow.description.is_empty() {
                println!("  Description: {}", workflow.description);
            }
            println!("  Steps:       {}", workflow.step_count);
            println!(
                "  Mode:        {}",
                if workflow.parallel_execution { "parallel" } else { "sequential" }
            );
            println!("  Agents:      {}", workflow.agents.join(", "));
            println!();
        } else {
            println!("• {:<24} {}", workflow.id.green(), workflow.name);
        }
    }
    Ok(())
}

async fn validate_workflow(file: &Path, config_path: Option<PathBuf>) -> Result<()> {
    println!("{}", "Validating workflow manifest...".cyan());
    println!("   File: {}", file.display());
    println!();

    let coordinator = Coordinator::load(config_path).await?;
    let defaults = coordinator.config().spec.engine.workflow_defaults();
    let outcome = WorkflowParser::parse_file_with(file, &defaults)
        .context("Failed to parse workflow manifest")
        .and_then(|workflow| {
            coordinator
                .engine()
                .check_definition(&workflow)
                .context("Workflow validation failed")?;
            Ok(workflow)
        });
    coordinator.shutdown().await;
    let workflow = outcome?;

    println!("{}", "✓ Workflow is valid!".green().bold());
    println!();
    println!("Workflow Details:");
    println!("  Id:          {}", workflow.id);
    println!("  Name:        {}", workflow.name);
    if !workflow.description.is_empty() {
        println!("  Description: {}", workflow.description);
    }
    println!(
        "  Mode:        {}",
        if workflow.parallel_execution { "parallel" } else { "sequential" }
    );
    println!("  Timeout:     {:?}", workflow.timeout);
    println!("  Steps:       {}", workflow.steps.len());
    for step in &workflow.steps {
        let deps = if step.dependencies.is_empty() {
            String::new()
        } else {
            format!(" (after {})", step.dependencies.join(", "))
        };
        println!("    - {} → {}{}", step.id, step.agent_id, deps.dimmed());
    }
    Ok(())
}

async fn describe_workflow(coordinator: &Coordinator, id: &str, output: &str) -> Result<()> {
    let workflow = coordinator.engine().get_workflow(id).await?;
    match output {
        "yaml" => print!("{}", serde_yaml::to_string(&workflow)?),
        "json" => println!("{}", serde_json::to_string_pretty(&workflow)?),
        other => anyhow::bail!("Invalid output format: '{}'. Use 'yaml' or 'json'", other),
    }
    Ok(())
}

async fn run_workflow(
    coordinator: &Coordinator,
    id: &str,
    data: Payload,
    follow: bool,
    parallel: bool,
    as_json: bool,
) -> Result<()> {
    let engine = coordinator.engine();
    if parallel {
        let workflow = engine.get_workflow(id).await?;
        if !workflow.parallel_execution {
            engine.create_workflow(workflow.parallel(true)).await?;
        }
    }

    if !as_json {
        println!("{}", "Starting workflow execution...".cyan());
        println!("   Workflow: {}", id);
        for (key, value) in &data {
            println!("   {}: {}", key, value);
        }
        println!();
    }

    let report = if follow {
        let (execution_id, handle) = engine.start_workflow(id, data).await?;
        let mut events = coordinator.events().subscribe_execution(execution_id);
        if !as_json {
            println!("  Execution ID: {}", execution_id);
        }
        loop {
            let event = events.recv().await.context("Event stream closed")?;
            if !as_json {
                print_event(&event);
            }
            if event.is_terminal() {
                break;
            }
        }
        handle.await.context("Workflow task failed")?
    } else {
        engine.execute_workflow(id, data).await?
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if report.status != ExecutionStatus::Completed {
        anyhow::bail!("Workflow '{}' finished with status {}", id, report.status);
    }
    Ok(())
}

fn print_event(event: &WorkflowEvent) {
    let line = match event {
        WorkflowEvent::StepStarted {
            step_id,
            agent_id,
            attempt,
            ..
        } => format!("  ▶ {} on {} (attempt {})", step_id, agent_id, attempt).normal(),
        WorkflowEvent::StepCompleted { step_id, .. } => format!("  ✓ {}", step_id).green(),
        WorkflowEvent::StepRetrying { step_id, error, .. } => {
            format!("  ↻ {} retrying: {}", step_id, error).yellow()
        }
        WorkflowEvent::StepFailed { step_id, error, .. } => {
            format!("  ✗ {}: {}", step_id, error).red()
        }
        WorkflowEvent::StepSkipped { step_id, reason, .. } => {
            format!("  ⤼ {} skipped: {}", step_id, reason).dimmed()
        }
        _ => return,
    };
    println!("{}", line);
}

fn print_report(report: &ExecutionReport) {
    println!();
    let status = match report.status {
        ExecutionStatus::Completed => "completed".green().bold(),
        ExecutionStatus::Cancelled => "cancelled".yellow().bold(),
        other => other.as_str().red().bold(),
    };
    println!("Status:       {}", status);
    println!("Execution ID: {}", report.execution_id);
    println!("Duration:     {:.3}s", report.duration);
    println!("Steps run:    {}", report.result.steps_executed);
    if !report.result.skipped_steps.is_empty() {
        println!("Skipped:      {}", report.result.skipped_steps.join(", "));
    }
    if !report.result.failed_steps.is_empty() {
        println!("Failed:       {}", report.result.failed_steps.join(", ").red());
    }
    if let Some(error) = &report.error {
        println!("Error:        {} ({})", error.message.red(), error.code);
    }

    for (step_id, result) in &report.result.step_results {
        println!();
        println!("{}", step_id.bold());
        let mut shown = result.clone();
        shown.remove("_metadata");
        match serde_json::to_string_pretty(&shown) {
            Ok(text) => println!("{}", text),
            Err(_) => println!("{:?}", shown),
        }
    }
}
