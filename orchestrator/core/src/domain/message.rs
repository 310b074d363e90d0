// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Message
//!
//! Immutable envelope exchanged between agents over the [`MessageBus`].
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Message identity, type, priority and expiry
//!
//! [`MessageBus`]: crate::infrastructure::message_bus::MessageBus

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Recipient id that fans a message out to every broadcast subscriber.
pub const BROADCAST: &str = "*";

/// Reserved recipient for error reports and heartbeats.
pub const SYSTEM: &str = "system";

/// Opaque key/value payload carried by messages and agent tasks.
pub type Payload = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    TaskRequest,
    TaskResponse,
    StatusUpdate,
    ErrorReport,
    Heartbeat,
    Shutdown,
    Coordination,
}

/// Four-level ordinal priority. Also used for workflow step priority.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl MessagePriority {
    pub fn ordinal(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub priority: MessagePriority,
    pub sender_id: String,
    pub recipient_id: String,
    pub payload: Payload,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(
        message_type: MessageType,
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            id: MessageId::new(),
            message_type,
            priority: MessagePriority::default(),
            sender_id: sender_id.into(),
            recipient_id: recipient_id.into(),
            payload,
            created_at: Utc::now(),
            reply_to: None,
            expires_at: None,
        }
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn in_reply_to(mut self, request: MessageId) -> Self {
        self.reply_to = Some(request);
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn expires_in(self, ttl: std::time::Duration) -> Self {
        let ttl = Duration::from_std(ttl).unwrap_or(Duration::MAX);
        let at = Utc::now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.expires_at(at)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn is_broadcast(&self) -> bool {
        self.recipient_id == BROADCAST
    }
}
