// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for request/response messaging over the bus
//!
//! Tests:
//! - Timed-out requests leave no correlation entry behind
//! - Many outstanding requests are each matched to their own response
//! - A correlated reply of any type resolves its request
//! - Cleanup fails outstanding requests and late responses are dropped
//! - Delivery order and expiry as seen by a communicator inbox

mod common;

use common::payload;
use concord_core::application::communicator::{AgentCommunicator, CommunicationError};
use concord_core::domain::message::{Message, MessagePriority, MessageType};
use concord_core::infrastructure::message_bus::MessageBus;
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn running_bus() -> MessageBus {
    let bus = MessageBus::new();
    bus.start();
    bus
}

/// Answers every task request with `{"echo": <n>}` after a delay proportional
/// to `n`, so responses arrive out of request order.
fn spawn_echo_server(bus: &MessageBus, agent_id: &str) -> Arc<AgentCommunicator> {
    let server = Arc::new(AgentCommunicator::new(agent_id, bus.clone()));
    let mut inbox = server.initialize().unwrap();
    let responder = server.clone();
    tokio::spawn(async move {
        while let Some(request) = inbox.recv().await {
            let responder = responder.clone();
            tokio::spawn(async move {
                let n = request.payload["n"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(20 - n % 20)).await;
                let _ = responder.send_response(&request, payload(json!({ "echo": n })));
            });
        }
    });
    server
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_request_is_forgotten() {
    let bus = running_bus();
    let client = AgentCommunicator::new("client", bus.clone());
    let _inbox = client.initialize().unwrap();

    let err = client
        .send_request("nobody_home", payload(json!({ "q": 1 })), Some(Duration::from_secs(2)))
        .await
        .unwrap_err();

    assert!(err.is_timeout(), "expected timeout, got {err}");
    assert_eq!(client.pending_count(), 0);
    bus.stop().await;
}

#[tokio::test]
async fn test_concurrent_requests_are_correlated() {
    let bus = running_bus();
    let _server = spawn_echo_server(&bus, "echo_server");
    let client = AgentCommunicator::new("client", bus.clone());
    let _inbox = client.initialize().unwrap();

    let requests = (0..40u64).map(|n| {
        let client = &client;
        async move {
            let response = client
                .send_request("echo_server", payload(json!({ "n": n })), Some(Duration::from_secs(5)))
                .await
                .unwrap();
            (n, response)
        }
    });

    for (n, response) in join_all(requests).await {
        assert_eq!(response.payload["echo"], json!(n));
        assert_eq!(response.message_type, MessageType::TaskResponse);
        assert_eq!(response.sender_id, "echo_server");
    }
    assert_eq!(client.pending_count(), 0);
    bus.stop().await;
}

#[tokio::test]
async fn test_error_report_reply_resolves_request() {
    let bus = running_bus();
    let client = Arc::new(AgentCommunicator::new("client", bus.clone()));
    let mut client_inbox = client.initialize().unwrap();

    let server = AgentCommunicator::new("server", bus.clone());
    let mut server_inbox = server.initialize().unwrap();
    let replier = bus.clone();
    tokio::spawn(async move {
        if let Some(request) = server_inbox.recv().await {
            replier.publish(
                Message::new(
                    MessageType::ErrorReport,
                    "server",
                    &request.sender_id,
                    payload(json!({ "error": "cannot comply" })),
                )
                .in_reply_to(request.id),
            );
        }
    });

    let response = client
        .send_request("server", payload(json!({ "q": 1 })), Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(response.message_type, MessageType::ErrorReport);
    assert_eq!(response.payload["error"], json!("cannot comply"));
    assert_eq!(client.pending_count(), 0);

    // Correlated replies never reach the inbox; an uncorrelated error report does.
    let stray = Message::new(
        MessageType::ErrorReport,
        "server",
        "client",
        payload(json!({ "error": "unsolicited" })),
    )
    .in_reply_to(response.id);
    bus.publish(stray);
    let delivered = tokio::time::timeout(Duration::from_secs(2), client_inbox.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivered.payload["error"], json!("unsolicited"));

    client.cleanup();
    bus.stop().await;
}

#[tokio::test]
async fn test_cleanup_fails_outstanding_requests() {
    let bus = running_bus();
    let client = Arc::new(AgentCommunicator::new("client", bus.clone()));
    let _inbox = client.initialize().unwrap();

    // A silent peer that records the request so it can answer after cleanup.
    let silent = AgentCommunicator::new("silent", bus.clone());
    let mut silent_inbox = silent.initialize().unwrap();

    let waiting = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .send_request("silent", payload(json!({ "q": "?" })), Some(Duration::from_secs(30)))
                .await
        })
    };

    let request = tokio::time::timeout(Duration::from_secs(2), silent_inbox.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(client.pending_count(), 1);

    client.cleanup();
    let outcome = waiting.await.unwrap();
    assert!(matches!(outcome, Err(CommunicationError::Cancelled { .. })));
    assert_eq!(client.pending_count(), 0);

    // The late answer has nowhere to go and must not resurrect anything.
    silent.send_response(&request, payload(json!({ "a": "!" }))).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.pending_count(), 0);
    assert!(matches!(
        client
            .send_request("silent", payload(json!({})), None)
            .await,
        Err(CommunicationError::Closed)
    ));
    bus.stop().await;
}

#[tokio::test]
async fn test_inbox_sees_priority_then_fifo_order() {
    let bus = MessageBus::new();
    let receiver = AgentCommunicator::new("receiver", bus.clone());
    let mut inbox = receiver.initialize().unwrap();

    // Queue everything before the dispatcher runs so ordering is decided by
    // the queue alone.
    let send = |label: &str, priority: MessagePriority| {
        bus.publish(
            Message::new(
                MessageType::Coordination,
                "sender",
                "receiver",
                payload(json!({ "label": label })),
            )
            .with_priority(priority),
        );
    };
    send("normal-1", MessagePriority::Normal);
    send("low", MessagePriority::Low);
    send("normal-2", MessagePriority::Normal);
    send("critical", MessagePriority::Critical);
    send("normal-3", MessagePriority::Normal);
    bus.publish(
        Message::new(
            MessageType::Coordination,
            "sender",
            "receiver",
            payload(json!({ "label": "stale" })),
        )
        .expires_in(Duration::from_millis(1)),
    );
    tokio::time::sleep(Duration::from_millis(10)).await;

    bus.start();

    let mut labels = Vec::new();
    for _ in 0..5 {
        let message = tokio::time::timeout(Duration::from_secs(2), inbox.recv())
            .await
            .unwrap()
            .unwrap();
        labels.push(message.payload["label"].as_str().unwrap().to_string());
    }
    assert_eq!(
        labels,
        vec!["critical", "normal-1", "normal-2", "normal-3", "low"]
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(inbox.try_recv().is_err(), "expired message was delivered");
    bus.stop().await;
}
