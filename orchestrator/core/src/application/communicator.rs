// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent Communicator - Per-agent facade over the message bus
//!
//! Sends notifications, correlates request/response pairs and hands every
//! other incoming message to the owning agent through an [`Inbox`].
//!
//! `send_request` is the only call that waits on the bus: it parks on a
//! oneshot channel keyed by the request id until a `task_response` with a
//! matching `reply_to` arrives or the deadline passes. Any number of requests
//! may be outstanding at once.

use crate::domain::message::{
    Message, MessageId, MessagePriority, MessageType, Payload, BROADCAST, SYSTEM,
};
use crate::infrastructure::message_bus::{MessageBus, MessageHandler, SubscriptionId};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Non-response messages addressed to the agent.
pub type Inbox = mpsc::UnboundedReceiver<Arc<Message>>;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum CommunicationError {
    #[error("Request {request_id} to '{recipient}' timed out after {timeout:?}")]
    Timeout {
        request_id: MessageId,
        recipient: String,
        timeout: Duration,
    },

    #[error("Request {request_id} was cancelled")]
    Cancelled { request_id: MessageId },

    #[error("Communicator has been cleaned up")]
    Closed,

    #[error("Communicator is not initialized")]
    NotInitialized,

    #[error("Communicator is already initialized")]
    AlreadyInitialized,

    #[error("Message {message_id} is not a task request")]
    NotARequest { message_id: MessageId },
}

impl CommunicationError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CommunicationError::Timeout { .. })
    }
}

#[derive(Default)]
struct PendingTable {
    closed: bool,
    requests: HashMap<MessageId, oneshot::Sender<Arc<Message>>>,
}

// Removes the correlation entry however the waiting future ends.
struct PendingGuard<'a> {
    table: &'a Mutex<PendingTable>,
    id: MessageId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.lock().requests.remove(&self.id);
    }
}

struct Router {
    agent_id: String,
    pending: Arc<Mutex<PendingTable>>,
    inbox: mpsc::UnboundedSender<Arc<Message>>,
}

#[async_trait]
impl MessageHandler for Router {
    async fn handle(&self, message: Arc<Message>) -> anyhow::Result<()> {
        // Any reply correlated with an outstanding request resolves it,
        // whatever its type; uncorrelated task responses are dropped.
        if let Some(request_id) = message.reply_to {
            let waiter = self.pending.lock().requests.remove(&request_id);
            if let Some(tx) = waiter {
                if tx.send(message).is_err() {
                    debug!(agent_id = %self.agent_id, %request_id, "Requester went away before response");
                }
                return Ok(());
            }
            if message.message_type == MessageType::TaskResponse {
                debug!(
                    agent_id = %self.agent_id,
                    %request_id,
                    "Dropping response with no outstanding request"
                );
                return Ok(());
            }
        }

        if self.inbox.send(message).is_err() {
            debug!(agent_id = %self.agent_id, "Inbox closed, dropping message");
        }
        Ok(())
    }
}

pub struct AgentCommunicator {
    agent_id: String,
    bus: MessageBus,
    default_timeout: Duration,
    pending: Arc<Mutex<PendingTable>>,
    subscription: Mutex<Option<SubscriptionId>>,
    heartbeat: Mutex<Option<CancellationToken>>,
}

impl AgentCommunicator {
    pub fn new(agent_id: impl Into<String>, bus: MessageBus) -> Self {
        Self {
            agent_id: agent_id.into(),
            bus,
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
            pending: Arc::new(Mutex::new(PendingTable::default())),
            subscription: Mutex::new(None),
            heartbeat: Mutex::new(None),
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Subscribe to the bus under the agent's own id.
    pub fn initialize(&self) -> Result<Inbox, CommunicationError> {
        if self.pending.lock().closed {
            return Err(CommunicationError::Closed);
        }
        let mut subscription = self.subscription.lock();
        if subscription.is_some() {
            return Err(CommunicationError::AlreadyInitialized);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let router = Arc::new(Router {
            agent_id: self.agent_id.clone(),
            pending: self.pending.clone(),
            inbox: tx,
        });
        *subscription = Some(self.bus.subscribe(self.agent_id.clone(), router));
        info!(agent_id = %self.agent_id, "Communicator initialized");
        Ok(rx)
    }

    pub fn is_initialized(&self) -> bool {
        self.subscription.lock().is_some()
    }

    fn ensure_open(&self) -> Result<(), CommunicationError> {
        if self.pending.lock().closed {
            Err(CommunicationError::Closed)
        } else {
            Ok(())
        }
    }

    fn publish(&self, message: Message) -> Result<MessageId, CommunicationError> {
        self.ensure_open()?;
        let id = message.id;
        self.bus.publish(message);
        Ok(id)
    }

    /// Send a request and wait for its correlated response.
    /// `None` uses the communicator's default timeout.
    pub async fn send_request(
        &self,
        recipient_id: &str,
        payload: Payload,
        timeout: Option<Duration>,
    ) -> Result<Arc<Message>, CommunicationError> {
        self.ensure_open()?;
        if !self.is_initialized() {
            return Err(CommunicationError::NotInitialized);
        }
        let timeout = timeout.unwrap_or(self.default_timeout);
        let request = Message::new(MessageType::TaskRequest, &self.agent_id, recipient_id, payload);
        let request_id = request.id;

        let (tx, rx) = oneshot::channel();
        {
            let mut table = self.pending.lock();
            if table.closed {
                return Err(CommunicationError::Closed);
            }
            table.requests.insert(request_id, tx);
        }
        let _guard = PendingGuard {
            table: &self.pending,
            id: request_id,
        };

        debug!(agent_id = %self.agent_id, recipient = %recipient_id, %request_id, "Sending request");
        self.bus.publish(request);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(CommunicationError::Cancelled { request_id }),
            Err(_) => {
                warn!(agent_id = %self.agent_id, recipient = %recipient_id, %request_id, "Request timed out");
                Err(CommunicationError::Timeout {
                    request_id,
                    recipient: recipient_id.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Answer a request addressed to this agent.
    pub fn send_response(
        &self,
        request: &Message,
        payload: Payload,
    ) -> Result<MessageId, CommunicationError> {
        if request.message_type != MessageType::TaskRequest {
            return Err(CommunicationError::NotARequest {
                message_id: request.id,
            });
        }
        let response = Message::new(
            MessageType::TaskResponse,
            &self.agent_id,
            &request.sender_id,
            payload,
        )
        .in_reply_to(request.id)
        .with_priority(request.priority);
        self.publish(response)
    }

    pub fn notify(
        &self,
        recipient_id: &str,
        message_type: MessageType,
        payload: Payload,
    ) -> Result<MessageId, CommunicationError> {
        self.publish(Message::new(message_type, &self.agent_id, recipient_id, payload))
    }

    pub fn broadcast_status(&self, payload: Payload) -> Result<MessageId, CommunicationError> {
        self.notify(BROADCAST, MessageType::StatusUpdate, payload)
    }

    pub fn report_error(&self, payload: Payload) -> Result<MessageId, CommunicationError> {
        self.publish(
            Message::new(MessageType::ErrorReport, &self.agent_id, SYSTEM, payload)
                .with_priority(MessagePriority::High),
        )
    }

    pub fn send_heartbeat(&self) -> Result<MessageId, CommunicationError> {
        let mut payload = Payload::new();
        payload.insert("status".to_string(), json!("alive"));
        payload.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));
        self.publish(
            Message::new(MessageType::Heartbeat, &self.agent_id, SYSTEM, payload)
                .with_priority(MessagePriority::Low),
        )
    }

    /// Send a heartbeat every `interval` until `cleanup` is called.
    pub fn start_heartbeat(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let token = CancellationToken::new();
        if let Some(previous) = self.heartbeat.lock().replace(token.clone()) {
            previous.cancel();
        }

        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = this.send_heartbeat() {
                            debug!(agent_id = %this.agent_id, error = %e, "Heartbeat loop stopping");
                            break;
                        }
                    }
                }
            }
        })
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().requests.len()
    }

    /// Unsubscribe and fail every outstanding request. Idempotent.
    pub fn cleanup(&self) {
        let cancelled = {
            let mut table = self.pending.lock();
            table.closed = true;
            let count = table.requests.len();
            table.requests.clear();
            count
        };

        if let Some(subscription) = self.subscription.lock().take() {
            self.bus.unsubscribe(&self.agent_id, Some(subscription));
        }
        if let Some(token) = self.heartbeat.lock().take() {
            token.cancel();
        }

        info!(agent_id = %self.agent_id, cancelled, "Communicator cleaned up");
    }
}

impl Drop for AgentCommunicator {
    fn drop(&mut self) {
        if let Some(token) = self.heartbeat.get_mut().take() {
            token.cancel();
        }
    }
}
