// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Message Bus Implementation - Priority-ordered point-to-point delivery
//
// A single background loop drains a priority queue and fans each message out
// to the handlers subscribed under its recipient id, falling back to the
// broadcast ("*") subscribers when the recipient has none.
//
// Delivery is best-effort and in-memory only. Handler failures and panics are
// logged and swallowed so one misbehaving subscriber never stalls the loop.

use crate::domain::message::{Message, MessagePriority, BROADCAST};
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A subscriber callback invoked for every message routed to its recipient id.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Arc<Message>) -> anyhow::Result<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Arc<Message>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, message: Arc<Message>) -> anyhow::Result<()> {
        (self.0)(message).await
    }
}

/// Wrap an async closure as a [`MessageHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Arc<Message>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Queued,
    /// The message had already expired and was dropped.
    Expired,
}

struct QueuedMessage {
    priority: MessagePriority,
    sequence: u64,
    message: Arc<Message>,
}

// Max-heap: highest priority first, then lowest sequence (arrival order).
impl Ord for QueuedMessage {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for QueuedMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedMessage {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}

impl Eq for QueuedMessage {}

type HandlerList = Vec<(SubscriptionId, Arc<dyn MessageHandler>)>;

struct BusInner {
    queue: Mutex<BinaryHeap<QueuedMessage>>,
    sequence: AtomicU64,
    wakeup: Notify,
    subscribers: RwLock<HashMap<String, HandlerList>>,
    next_subscription: AtomicU64,
    delivery: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

/// In-process message bus. Cloning yields another handle to the same bus.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                queue: Mutex::new(BinaryHeap::new()),
                sequence: AtomicU64::new(0),
                wakeup: Notify::new(),
                subscribers: RwLock::new(HashMap::new()),
                next_subscription: AtomicU64::new(1),
                delivery: Mutex::new(None),
            }),
        }
    }

    /// Spawn the delivery loop. Calling `start` on a running bus is a no-op.
    pub fn start(&self) {
        let mut delivery = self.inner.delivery.lock();
        if delivery.is_some() {
            debug!("Message bus already running");
            return;
        }

        let token = CancellationToken::new();
        let bus = self.clone();
        let loop_token = token.clone();
        let handle = tokio::spawn(async move { bus.delivery_loop(loop_token).await });
        *delivery = Some((token, handle));
        info!("Message bus started");
    }

    /// Stop the delivery loop and wait for it to exit. Queued messages are kept.
    pub async fn stop(&self) {
        let running = self.inner.delivery.lock().take();
        if let Some((token, handle)) = running {
            token.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Message bus delivery loop exited abnormally");
            }
            info!("Message bus stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.delivery.lock().is_some()
    }

    /// Enqueue a message for delivery. Expired messages are dropped silently.
    pub fn publish(&self, message: Message) -> PublishOutcome {
        if message.is_expired(chrono::Utc::now()) {
            debug!(
                message_id = %message.id,
                recipient = %message.recipient_id,
                "Dropping expired message at publish"
            );
            return PublishOutcome::Expired;
        }

        let sequence = self.inner.sequence.fetch_add(1, AtomicOrdering::Relaxed);
        self.inner.queue.lock().push(QueuedMessage {
            priority: message.priority,
            sequence,
            message: Arc::new(message),
        });
        self.inner.wakeup.notify_one();
        PublishOutcome::Queued
    }

    pub fn subscribe(
        &self,
        recipient_id: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> SubscriptionId {
        let id = SubscriptionId(
            self.inner
                .next_subscription
                .fetch_add(1, AtomicOrdering::Relaxed),
        );
        let recipient_id = recipient_id.into();
        debug!(recipient = %recipient_id, subscription = id.0, "Subscribing handler");
        self.inner
            .subscribers
            .write()
            .entry(recipient_id)
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove one subscription, or every handler of `recipient_id` when
    /// `subscription` is `None`. Returns whether anything was removed.
    pub fn unsubscribe(&self, recipient_id: &str, subscription: Option<SubscriptionId>) -> bool {
        let mut subscribers = self.inner.subscribers.write();
        let removed = match subscription {
            None => subscribers.remove(recipient_id).is_some(),
            Some(id) => match subscribers.get_mut(recipient_id) {
                Some(handlers) => {
                    let before = handlers.len();
                    handlers.retain(|(sid, _)| *sid != id);
                    let removed = handlers.len() != before;
                    if handlers.is_empty() {
                        subscribers.remove(recipient_id);
                    }
                    removed
                }
                None => false,
            },
        };
        debug!(recipient = %recipient_id, removed, "Unsubscribed");
        removed
    }

    pub fn subscriber_count(&self, recipient_id: &str) -> usize {
        self.inner
            .subscribers
            .read()
            .get(recipient_id)
            .map_or(0, Vec::len)
    }

    pub fn queued_len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    async fn delivery_loop(self, token: CancellationToken) {
        loop {
            if token.is_cancelled() {
                break;
            }

            let next = self.inner.queue.lock().pop();
            match next {
                Some(queued) => self.deliver(queued.message).await,
                None => {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = self.inner.wakeup.notified() => {}
                    }
                }
            }
        }
        debug!("Message bus delivery loop exiting");
    }

    fn handlers_for(&self, recipient_id: &str) -> HandlerList {
        let subscribers = self.inner.subscribers.read();
        subscribers
            .get(recipient_id)
            .filter(|handlers| !handlers.is_empty())
            .or_else(|| subscribers.get(BROADCAST))
            .cloned()
            .unwrap_or_default()
    }

    async fn deliver(&self, message: Arc<Message>) {
        if message.is_expired(chrono::Utc::now()) {
            debug!(message_id = %message.id, "Dropping message that expired in queue");
            return;
        }

        let handlers = self.handlers_for(&message.recipient_id);
        if handlers.is_empty() {
            debug!(
                message_id = %message.id,
                recipient = %message.recipient_id,
                "No subscribers for message"
            );
            return;
        }

        for (subscription, handler) in handlers {
            let outcome = AssertUnwindSafe(handler.handle(message.clone()))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    message_id = %message.id,
                    recipient = %message.recipient_id,
                    subscription = subscription.0,
                    error = %e,
                    "Message handler failed"
                ),
                Err(_) => warn!(
                    message_id = %message.id,
                    recipient = %message.recipient_id,
                    subscription = subscription.0,
                    "Message handler panicked"
                ),
            }
        }
    }
}
