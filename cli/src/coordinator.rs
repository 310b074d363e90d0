// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Embedded coordinator
//!
//! Builds the full service graph in-process: message bus, event bus, agent
//! registry with the demo agents, and a workflow engine loaded from the
//! configured workflow directory (or the bundled manifests).

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use concord_core::{
    application::{
        orchestration_endpoint::OrchestrationEndpoint, registry::AgentRegistry,
        workflow_engine::EngineSettings, workflow_engine::WorkflowEngine,
    },
    domain::config::ConcordConfig,
    infrastructure::{
        event_bus::EventBus, message_bus::MessageBus, workflow_parser::WorkflowParser,
    },
};

use crate::demo_agents;

pub struct Coordinator {
    config: ConcordConfig,
    bus: MessageBus,
    events: EventBus,
    registry: Arc<AgentRegistry>,
    engine: Arc<WorkflowEngine>,
}

impl Coordinator {
    /// Discover and load configuration, then bootstrap.
    pub async fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let config =
            ConcordConfig::load_or_default(config_path).context("Failed to load configuration")?;
        Self::bootstrap(config).await
    }

    pub async fn bootstrap(config: ConcordConfig) -> Result<Self> {
        config
            .validate()
            .context("Configuration validation failed")?;

        let events = EventBus::with_default_capacity();
        let bus = MessageBus::new();
        bus.start();

        let registry = Arc::new(AgentRegistry::new().with_event_bus(events.clone()));
        demo_agents::register_demo_agents(&registry);
        for base in demo_agents::demo_agent_configs() {
            let merged = match config.spec.agents.get(&base.agent_id) {
                Some(over) => over.apply_to(base),
                None => base,
            };
            registry.configure(merged);
        }
        for (agent_id, over) in &config.spec.agents {
            if !registry.is_registered(agent_id) {
                warn!(agent_id = %agent_id, "Configuration names an agent with no implementation");
                registry.configure(over.to_agent_config(agent_id));
            }
        }

        let engine = Arc::new(
            WorkflowEngine::in_memory(registry.clone())
                .with_event_bus(events.clone())
                .with_settings(EngineSettings::from(&config.spec.engine)),
        );

        let coordinator = Self {
            config,
            bus,
            events,
            registry,
            engine,
        };
        coordinator.load_workflows().await?;
        Ok(coordinator)
    }

    async fn load_workflows(&self) -> Result<()> {
        let dir = match &self.config.spec.workflows_dir {
            Some(dir) if dir.is_dir() => dir,
            Some(dir) => {
                warn!(path = %dir.display(), "Workflow directory not found, using bundled workflows");
                self.engine.install_default_workflows().await?;
                return Ok(());
            }
            None => {
                self.engine.install_default_workflows().await?;
                return Ok(());
            }
        };

        let defaults = self.config.spec.engine.workflow_defaults();
        let definitions = WorkflowParser::load_dir(dir, &defaults)
            .with_context(|| format!("Failed to load workflows from {}", dir.display()))?;
        for definition in definitions {
            let id = definition.id.clone();
            self.engine
                .create_workflow(definition)
                .await
                .with_context(|| format!("Workflow '{}' is not valid", id))?;
        }
        info!(path = %dir.display(), "Loaded workflow manifests");
        Ok(())
    }

    pub fn config(&self) -> &ConcordConfig {
        &self.config
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    /// Serve orchestration requests on the bus until `shutdown` fires.
    pub async fn serve(&self, shutdown: CancellationToken) -> Result<()> {
        let endpoint = Arc::new(OrchestrationEndpoint::new(
            self.engine.clone(),
            self.bus.clone(),
        ));
        let communicator = endpoint.communicator().clone();
        let handle = endpoint.spawn(shutdown.clone())?;
        let _heartbeat =
            communicator.start_heartbeat(self.config.spec.communication.heartbeat_interval);

        shutdown.cancelled().await;
        handle.await.context("Orchestration endpoint task failed")?;
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
        self.bus.stop().await;
        info!("Coordinator stopped");
    }
}
