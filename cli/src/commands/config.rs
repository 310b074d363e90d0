// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use concord_core::domain::config::{ConcordConfig, CONFIG_PATH_ENV};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./concord-config.yaml)
        #[arg(short, long, default_value = "./concord-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = ConcordConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  --config flag: {}", path.display()),
            None => println!("  --config flag: {}", "(not set)".dimmed()),
        }
        if std::env::var(CONFIG_PATH_ENV).is_err() {
            println!("  {}: {}", CONFIG_PATH_ENV, "(not set)".dimmed());
        }
        for (i, path) in ConcordConfig::search_paths().iter().enumerate() {
            let marker = if path.exists() { "✓".green() } else { " ".normal() };
            println!("  {}. {} {}", i + 1, marker, path.display());
        }
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!("  Name: {}", config.metadata.name);
    println!();

    let communication = &config.spec.communication;
    println!("{}", "Communication:".bold());
    println!("  Request timeout:    {:?}", communication.request_timeout);
    println!("  Heartbeat interval: {:?}", communication.heartbeat_interval);
    println!();

    let engine = &config.spec.engine;
    println!("{}", "Workflow engine:".bold());
    println!("  Retry backoff:      {:?}", engine.retry_backoff);
    println!("  Step timeout:       {:?}", engine.default_step_timeout);
    println!("  Retry count:        {}", engine.default_retry_count);
    println!("  Workflow timeout:   {:?}", engine.default_workflow_timeout);
    println!("  History limit:      {}", engine.history_limit);
    match &config.spec.workflows_dir {
        Some(dir) => println!("  Workflows dir:      {}", dir.display()),
        None => println!("  Workflows dir:      {}", "(bundled workflows)".dimmed()),
    }
    println!();

    if !config.spec.agents.is_empty() {
        println!("{}", "Agent overrides:".bold());
        for agent in config.agent_configs() {
            println!("  {} ({:?})", agent.agent_id.bold(), agent.category);
            println!("    Title: {}", agent.title);
            if !agent.capabilities.is_empty() {
                println!("    Capabilities: {}", agent.capabilities.join(", "));
            }
        }
        println!();
    }

    println!("Log level: {}", config.spec.observability.log_level);
    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config =
        ConcordConfig::load_or_default(config_path).context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        include_str!("../../templates/config-with-examples.yaml")
    } else {
        include_str!("../../templates/config-minimal.yaml")
    };

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
