// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime-backed messaging client against a fake device runtime.

use std::sync::{Arc, Mutex};

use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zapgate_core::dispatch::classify;
use zapgate_core::messaging::{ClientEvent, MessagingClient, RuntimeMessagingClient};
use zapgate_core::registry::ContainerDescriptor;
use zapgate_core::store::SendStatus;

fn client_for(server: &MockServer) -> RuntimeMessagingClient {
    let device =
        ContainerDescriptor::new("c-test", "127.0.0.1", server.address().port()).unwrap();
    RuntimeMessagingClient::new(reqwest::Client::new(), device)
}

fn recorder(client: &RuntimeMessagingClient) -> Arc<Mutex<Vec<ClientEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    client.subscribe_events(Arc::new(move |event| sink.lock().unwrap().push(event)));
    events
}

#[tokio::test]
async fn test_connect_emits_connected_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let events = recorder(&client);

    client.connect().await.unwrap();
    client.connect().await.unwrap();

    assert!(client.is_connected());
    assert_eq!(*events.lock().unwrap(), vec![ClientEvent::Connected]);
}

#[tokio::test]
async fn test_unhealthy_runtime_does_not_connect() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let events = recorder(&client);

    let err = client.connect().await.unwrap_err();
    assert!(!client.is_connected());
    assert_eq!(classify(&err), SendStatus::DeviceExpired);
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_send_posts_number_and_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/send"))
        .and(body_json(json!({"number": "5511999990002", "message": "hello"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "msg-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let receipt = client.send_text("5511999990002", "hello").await.unwrap();
    assert_eq!(receipt.message_id.as_deref(), Some("msg-1"));
}

#[tokio::test]
async fn test_send_without_body_still_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/send"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let receipt = client.send_text("5511999990002", "hello").await.unwrap();
    assert_eq!(receipt.message_id, None);
}

#[tokio::test]
async fn test_unavailable_runtime_marks_session_expired() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/send"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let events = recorder(&client);
    client.connect().await.unwrap();

    let err = client.send_text("5511999990002", "hello").await.unwrap_err();
    assert_eq!(classify(&err), SendStatus::DeviceExpired);
    assert!(!client.is_connected());

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert!(matches!(events[1], ClientEvent::Disconnected { .. }));
}

#[tokio::test]
async fn test_runtime_error_is_plain_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/send"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid number"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.send_text("abc", "hello").await.unwrap_err();
    assert_eq!(classify(&err), SendStatus::Failed);
    assert!(err.message.contains("invalid number"));
}
