// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared workers and helpers for the integration suites.

#![allow(dead_code)]

use async_trait::async_trait;
use concord_core::application::registry::AgentRegistry;
use concord_core::domain::agent::AgentWorker;
use concord_core::domain::message::Payload;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Ordered log of `start:<agent>` / `end:<agent>` entries shared by workers.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: String) {
        self.0.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn position(&self, entry: &str) -> usize {
        self.entries()
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("'{}' not in journal {:?}", entry, self.entries()))
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.0.lock().iter().any(|e| e == entry)
    }
}

/// Echoes its input back under `input`, tagged with its own name.
pub struct Recorder {
    pub name: String,
    pub journal: Journal,
    pub delay: Duration,
}

#[async_trait]
impl AgentWorker for Recorder {
    async fn process(&self, input: Payload) -> anyhow::Result<Payload> {
        self.journal.record(format!("start:{}", self.name));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.journal.record(format!("end:{}", self.name));

        let mut out = Payload::new();
        out.insert("handled_by".to_string(), Value::String(self.name.clone()));
        out.insert("input".to_string(), Value::Object(input));
        Ok(out)
    }
}

/// Fails every call and counts how often it was invoked.
pub struct AlwaysFails {
    pub calls: Arc<AtomicU32>,
}

#[async_trait]
impl AgentWorker for AlwaysFails {
    async fn process(&self, _input: Payload) -> anyhow::Result<Payload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("simulated outage")
    }
}

/// Blocks each call until a permit is added to the gate.
pub struct Gated {
    pub gate: Arc<Semaphore>,
    pub journal: Journal,
    pub name: String,
}

#[async_trait]
impl AgentWorker for Gated {
    async fn process(&self, _input: Payload) -> anyhow::Result<Payload> {
        self.journal.record(format!("start:{}", self.name));
        self.gate.acquire().await?.forget();
        self.journal.record(format!("end:{}", self.name));
        Ok(Payload::new())
    }
}

pub fn register_recorder(registry: &AgentRegistry, name: &str, journal: &Journal, delay: Duration) {
    let journal = journal.clone();
    let agent = name.to_string();
    registry.register(name, move |_| {
        Ok(Arc::new(Recorder {
            name: agent.clone(),
            journal: journal.clone(),
            delay,
        }) as Arc<dyn AgentWorker>)
    });
}

pub fn register_failing(registry: &AgentRegistry, name: &str) -> Arc<AtomicU32> {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    registry.register(name, move |_| {
        Ok(Arc::new(AlwaysFails {
            calls: counter.clone(),
        }) as Arc<dyn AgentWorker>)
    });
    calls
}

pub fn register_gated(registry: &AgentRegistry, name: &str, journal: &Journal) -> Arc<Semaphore> {
    let gate = Arc::new(Semaphore::new(0));
    let shared = gate.clone();
    let journal = journal.clone();
    let agent = name.to_string();
    registry.register(name, move |_| {
        Ok(Arc::new(Gated {
            gate: shared.clone(),
            journal: journal.clone(),
            name: agent.clone(),
        }) as Arc<dyn AgentWorker>)
    });
    gate
}

pub fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

/// Drop every `_metadata` entry, at any depth.
pub fn strip_metadata(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| k.as_str() != "_metadata")
                .map(|(k, v)| (k.clone(), strip_metadata(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_metadata).collect()),
        other => other.clone(),
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F: Fn() -> bool>(check: F) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
