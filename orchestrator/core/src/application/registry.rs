// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent Registry
//!
//! Instantiates, caches and manages the lifecycle of live agents.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** One live [`Agent`] per id, built on demand from an explicit
//!   factory table populated at startup.
//!
//! Lookups of a healthy cached instance take a shared read lock only.
//! Construction and restarts are serialized behind a creation lock and
//! re-check the cache after acquiring it, so concurrent `get_agent` calls for
//! the same id never build two instances.

use crate::domain::agent::{
    Agent, AgentConfig, AgentError, AgentHealth, AgentInfo, AgentOutput, AgentStatus, AgentWorker,
};
use crate::domain::events::AgentLifecycleEvent;
use crate::domain::message::Payload;
use crate::infrastructure::event_bus::EventBus;
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Builds a worker for an agent id from its configuration.
pub type AgentFactory =
    Arc<dyn Fn(&AgentConfig) -> anyhow::Result<Arc<dyn AgentWorker>> + Send + Sync>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Agent '{0}' not found")]
    NotFound(String),

    #[error("Failed to construct agent '{agent_id}': {reason}")]
    ConstructionFailed { agent_id: String, reason: String },

    #[error(transparent)]
    Agent(#[from] AgentError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BroadcastOutcome {
    Success { result: Payload },
    Error { error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryHealth {
    pub registry_status: String,
    pub total_agents: usize,
    pub active_agents: usize,
    pub agents: BTreeMap<String, AgentHealth>,
}

pub struct AgentRegistry {
    factories: parking_lot::RwLock<HashMap<String, AgentFactory>>,
    configs: parking_lot::RwLock<HashMap<String, AgentConfig>>,
    instances: RwLock<HashMap<String, Arc<Agent>>>,
    creation: Mutex<()>,
    event_bus: Option<EventBus>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            factories: parking_lot::RwLock::new(HashMap::new()),
            configs: parking_lot::RwLock::new(HashMap::new()),
            instances: RwLock::new(HashMap::new()),
            creation: Mutex::new(()),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Register the constructor for an agent id, replacing any previous one.
    pub fn register<F>(&self, agent_id: impl Into<String>, factory: F)
    where
        F: Fn(&AgentConfig) -> anyhow::Result<Arc<dyn AgentWorker>> + Send + Sync + 'static,
    {
        let agent_id = agent_id.into();
        debug!(agent_id = %agent_id, "Registering agent factory");
        self.factories.write().insert(agent_id, Arc::new(factory));
    }

    /// Override the default configuration used when the agent is instantiated.
    pub fn configure(&self, config: AgentConfig) {
        self.configs.write().insert(config.agent_id.clone(), config);
    }

    pub fn is_registered(&self, agent_id: &str) -> bool {
        self.factories.read().contains_key(agent_id)
    }

    /// Ids with a registered factory, sorted.
    pub fn available_agents(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.factories.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn config_for(&self, agent_id: &str) -> AgentConfig {
        self.configs
            .read()
            .get(agent_id)
            .cloned()
            .unwrap_or_else(|| AgentConfig::default_for(agent_id))
    }

    fn emit(&self, event: AgentLifecycleEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish_agent_event(event);
        }
    }

    fn start_failed(&self, agent: &Agent) -> RegistryError {
        let reason = agent
            .info()
            .last_error
            .unwrap_or_else(|| "unknown error".to_string());
        self.emit(AgentLifecycleEvent::AgentStartFailed {
            agent_id: agent.id().to_string(),
            reason: reason.clone(),
            failed_at: Utc::now(),
        });
        RegistryError::Agent(AgentError::StartFailed {
            agent_id: agent.id().to_string(),
            reason,
        })
    }

    fn needs_start(agent: &Agent) -> bool {
        matches!(
            agent.status(),
            AgentStatus::Stopped | AgentStatus::Initializing
        )
    }

    /// Return the live instance for `agent_id`, creating and starting it if
    /// needed. A stopped instance is restarted when `auto_start` is set.
    pub async fn get_agent(
        &self,
        agent_id: &str,
        auto_start: bool,
    ) -> Result<Arc<Agent>, RegistryError> {
        if let Some(agent) = self.instances.read().await.get(agent_id) {
            if !auto_start || !Self::needs_start(agent) {
                return Ok(agent.clone());
            }
        }

        let _creating = self.creation.lock().await;

        let cached = self.instances.read().await.get(agent_id).cloned();
        if let Some(agent) = cached {
            if auto_start && Self::needs_start(&agent) {
                info!(agent_id = %agent_id, "Restarting agent");
                if !agent.start().await {
                    self.instances.write().await.remove(agent_id);
                    return Err(self.start_failed(&agent));
                }
                self.emit(AgentLifecycleEvent::AgentStarted {
                    agent_id: agent_id.to_string(),
                    instance_id: agent.instance_id(),
                    started_at: Utc::now(),
                });
            }
            return Ok(agent);
        }

        let factory = self
            .factories
            .read()
            .get(agent_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(agent_id.to_string()))?;
        let config = self.config_for(agent_id);

        let worker = factory(&config).map_err(|e| {
            warn!(agent_id = %agent_id, error = %e, "Agent construction failed");
            RegistryError::ConstructionFailed {
                agent_id: agent_id.to_string(),
                reason: e.to_string(),
            }
        })?;
        let agent = Arc::new(Agent::new(config, worker));

        if auto_start {
            if !agent.start().await {
                return Err(self.start_failed(&agent));
            }
            self.emit(AgentLifecycleEvent::AgentStarted {
                agent_id: agent_id.to_string(),
                instance_id: agent.instance_id(),
                started_at: Utc::now(),
            });
        }

        self.instances
            .write()
            .await
            .insert(agent_id.to_string(), agent.clone());
        info!(agent_id = %agent_id, instance_id = %agent.instance_id(), "Agent instantiated");
        Ok(agent)
    }

    /// Stop a live agent. It stays cached and restarts on the next `get_agent`.
    /// Serialized with creation so a restart in progress cannot undo the stop.
    pub async fn stop_agent(&self, agent_id: &str) -> Result<(), RegistryError> {
        let _creating = self.creation.lock().await;
        let agent = self
            .instances
            .read()
            .await
            .get(agent_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(agent_id.to_string()))?;

        agent.stop().await;
        self.emit(AgentLifecycleEvent::AgentStopped {
            agent_id: agent_id.to_string(),
            instance_id: agent.instance_id(),
            stopped_at: Utc::now(),
        });
        Ok(())
    }

    /// Stop a live agent and drop it from the cache.
    pub async fn remove_agent(&self, agent_id: &str) -> Result<(), RegistryError> {
        let agent = {
            let _creating = self.creation.lock().await;
            self.instances.write().await.remove(agent_id)
        }
        .ok_or_else(|| RegistryError::NotFound(agent_id.to_string()))?;

        agent.stop().await;
        self.emit(AgentLifecycleEvent::AgentRemoved {
            agent_id: agent_id.to_string(),
            removed_at: Utc::now(),
        });
        info!(agent_id = %agent_id, "Agent removed");
        Ok(())
    }

    /// Snapshots of every live agent, sorted by id.
    pub async fn list_agents(&self) -> Vec<AgentInfo> {
        let mut infos: Vec<AgentInfo> = self
            .instances
            .read()
            .await
            .values()
            .map(|agent| agent.info())
            .collect();
        infos.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        infos
    }

    pub async fn agent_status(&self, agent_id: &str) -> Option<AgentInfo> {
        self.instances
            .read()
            .await
            .get(agent_id)
            .map(|agent| agent.info())
    }

    pub async fn execute_agent(
        &self,
        agent_id: &str,
        payload: Payload,
    ) -> Result<AgentOutput, RegistryError> {
        let agent = self.get_agent(agent_id, true).await?;
        Ok(agent.execute(payload).await?)
    }

    /// Run `payload` on many live agents concurrently and collect each outcome.
    /// Without explicit targets every live agent receives it.
    pub async fn broadcast_message(
        &self,
        payload: Payload,
        targets: Option<&[String]>,
    ) -> BTreeMap<String, BroadcastOutcome> {
        let live: HashMap<String, Arc<Agent>> = self.instances.read().await.clone();
        let targets: Vec<String> = match targets {
            Some(ids) => ids.to_vec(),
            None => {
                let mut ids: Vec<String> = live
                    .iter()
                    .filter(|(_, agent)| agent.status().is_healthy())
                    .map(|(id, _)| id.clone())
                    .collect();
                ids.sort();
                ids
            }
        };

        let runs = targets.into_iter().map(|id| {
            let agent = live.get(&id).cloned();
            let payload = payload.clone();
            async move {
                let outcome = match agent {
                    Some(agent) => match agent.execute(payload).await {
                        Ok(output) => BroadcastOutcome::Success {
                            result: output.result,
                        },
                        Err(e) => BroadcastOutcome::Error {
                            error: e.to_string(),
                        },
                    },
                    None => BroadcastOutcome::Error {
                        error: format!("Agent '{}' is not live", id),
                    },
                };
                (id, outcome)
            }
        });

        join_all(runs).await.into_iter().collect()
    }

    pub async fn health_check(&self) -> RegistryHealth {
        let agents: BTreeMap<String, AgentHealth> = self
            .instances
            .read()
            .await
            .iter()
            .map(|(id, agent)| (id.clone(), agent.health()))
            .collect();

        RegistryHealth {
            registry_status: "healthy".to_string(),
            total_agents: agents.len(),
            active_agents: agents.values().filter(|h| h.healthy).count(),
            agents,
        }
    }

    /// Stop every live agent and clear the cache.
    pub async fn shutdown(&self) {
        let agents: Vec<Arc<Agent>> = {
            let _creating = self.creation.lock().await;
            self.instances.write().await.drain().map(|(_, a)| a).collect()
        };
        for agent in &agents {
            agent.stop().await;
        }
        info!(stopped = agents.len(), "Agent registry shut down");
    }
}
