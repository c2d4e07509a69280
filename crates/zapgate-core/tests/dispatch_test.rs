// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bulk dispatch tests with the mock messaging client.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use zapgate_core::Error;
use zapgate_core::dispatch::{BulkDispatcher, DEVICE_EXPIRED_MESSAGE, DispatchConfig};
use zapgate_core::messaging::{MockClientFactory, MockMessagingClient, RuntimeClientFactory};
use zapgate_core::runtime::MockRuntime;
use zapgate_core::session::SessionBridge;
use zapgate_core::store::{DeviceStore, MemoryStore};

const TENANT: &str = "tenant-a";
const DEVICE: &str = "5511999990001";

struct Harness {
    client: Arc<MockMessagingClient>,
    factory: Arc<MockClientFactory>,
    store: Arc<MemoryStore>,
    dispatcher: BulkDispatcher,
}

fn harness(client: MockMessagingClient, config: DispatchConfig) -> Harness {
    let client = Arc::new(client);
    let factory = Arc::new(MockClientFactory::new(client.clone()));
    let store = Arc::new(MemoryStore::new());
    let bridge = Arc::new(SessionBridge::new(store.clone(), factory.clone()));
    Harness {
        client,
        factory,
        store,
        dispatcher: BulkDispatcher::new(bridge, config),
    }
}

fn recipients(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("55119{:08}", i)).collect()
}

async fn statuses(store: &MemoryStore) -> Vec<String> {
    store
        .list_messages(TENANT, DEVICE, 1000)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.status)
        .collect()
}

#[tokio::test]
async fn test_empty_recipient_list_is_rejected_before_any_client_work() {
    let h = harness(MockMessagingClient::new(), DispatchConfig::unpaced(5));

    let err = h
        .dispatcher
        .send_many(TENANT, DEVICE, &[], "hello", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(h.factory.opened(), 0);
}

#[tokio::test]
async fn test_recipient_limit_boundaries() {
    let h = harness(MockMessagingClient::new(), DispatchConfig::unpaced(5));

    let err = h
        .dispatcher
        .send_many(TENANT, DEVICE, &recipients(101), "hello", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(h.factory.opened(), 0);

    let summary = h
        .dispatcher
        .send_many(TENANT, DEVICE, &recipients(100), "hello", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.sent, 100);
    assert_eq!(h.client.sent().len(), 100);
}

#[tokio::test]
async fn test_all_transport_failures_surface_as_expired() {
    let client = MockMessagingClient::new();
    client.fail_all("write tcp: socket closed");
    let h = harness(client, DispatchConfig::unpaced(5));

    let err = h
        .dispatcher
        .send_many(TENANT, DEVICE, &recipients(100), "hello", &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        Error::TransportExpired { device, message } => {
            assert_eq!(device, DEVICE);
            assert_eq!(message, DEVICE_EXPIRED_MESSAGE);
        }
        other => panic!("expected TransportExpired, got {:?}", other),
    }

    let statuses = statuses(&h.store).await;
    assert_eq!(statuses.len(), 100);
    assert!(statuses.iter().all(|s| s == "device_expired"));
}

#[tokio::test]
async fn test_partial_failure_is_success() {
    let client = MockMessagingClient::new();
    let all = recipients(100);
    for r in &all[..10] {
        client.fail_recipient(r, "invalid recipient");
    }
    let h = harness(client, DispatchConfig::unpaced(5));

    let summary = h
        .dispatcher
        .send_many(TENANT, DEVICE, &all, "hello", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.sent, 90);
    assert_eq!(summary.failed, 10);
    assert_eq!(summary.expired, 0);
    assert_eq!(summary.skipped, 0);

    let statuses = statuses(&h.store).await;
    assert_eq!(statuses.iter().filter(|s| *s == "sent").count(), 90);
    assert_eq!(statuses.iter().filter(|s| *s == "failed").count(), 10);
}

#[tokio::test]
async fn test_all_generic_failures_return_send_failure() {
    let client = MockMessagingClient::new();
    client.fail_all("invalid recipient");
    let h = harness(client, DispatchConfig::unpaced(3));

    let err = h
        .dispatcher
        .send_many(TENANT, DEVICE, &recipients(4), "hello", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::SendFailure { .. }));
}

#[tokio::test]
async fn test_disconnected_session_marks_everyone_expired_without_sending() {
    let h = harness(MockMessagingClient::unreachable(), DispatchConfig::unpaced(5));

    let err = h
        .dispatcher
        .send_many(TENANT, DEVICE, &recipients(7), "hello", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::TransportExpired { .. }));
    assert!(h.client.sent().is_empty());
    let statuses = statuses(&h.store).await;
    assert_eq!(statuses.len(), 7);
    assert!(statuses.iter().all(|s| s == "device_expired"));
}

#[tokio::test]
async fn test_in_flight_sends_never_exceed_worker_count() {
    let client = MockMessagingClient::new().with_send_delay(Duration::from_millis(10));
    let h = harness(client, DispatchConfig::unpaced(4));

    let summary = h
        .dispatcher
        .send_many(TENANT, DEVICE, &recipients(40), "hello", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.sent, 40);
    assert!(h.client.max_in_flight() <= 4);
    assert!(h.client.max_in_flight() >= 2);
}

#[tokio::test]
async fn test_cancellation_drains_workers_before_returning() {
    let client = MockMessagingClient::new().with_send_delay(Duration::from_millis(30));
    let h = harness(client, DispatchConfig::unpaced(2));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(70)).await;
        trigger.cancel();
    });

    let result = h
        .dispatcher
        .send_many(TENANT, DEVICE, &recipients(50), "hello", &cancel)
        .await;

    // No send is still running once the engine has returned.
    assert_eq!(h.client.in_flight(), 0);

    let summary = result.unwrap();
    assert!(summary.sent > 0);
    assert!(summary.skipped > 0);
    assert_eq!(summary.sent + summary.skipped, 50);

    // Everything attempted was recorded.
    assert_eq!(statuses(&h.store).await.len(), summary.sent);
}

#[tokio::test]
async fn test_cancelled_before_start_reports_cancelled() {
    let h = harness(MockMessagingClient::new(), DispatchConfig::unpaced(2));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h
        .dispatcher
        .send_many(TENANT, DEVICE, &recipients(5), "hello", &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert!(h.client.sent().is_empty());
}

#[tokio::test]
async fn test_batch_pacing_slows_the_producer() {
    let config = DispatchConfig {
        workers: 2,
        batch_delay: Duration::from_millis(40),
        send_delay: Duration::ZERO,
    };
    let h = harness(MockMessagingClient::new(), config);

    let started = std::time::Instant::now();
    h.dispatcher
        .send_many(TENANT, DEVICE, &recipients(6), "hello", &CancellationToken::new())
        .await
        .unwrap();

    // Two pauses: after the 2nd and the 4th task.
    assert!(started.elapsed() >= Duration::from_millis(80));
}

#[tokio::test]
async fn test_unknown_device_is_not_provisioned_by_dispatch() {
    let runtime = Arc::new(MockRuntime::new());
    let lifecycle = Arc::new(common::lifecycle(runtime.clone()));
    let factory = Arc::new(RuntimeClientFactory::new(lifecycle, reqwest::Client::new()));
    let store = Arc::new(MemoryStore::new());
    let bridge = Arc::new(SessionBridge::new(store.clone(), factory));
    let dispatcher = BulkDispatcher::new(bridge, DispatchConfig::unpaced(5));

    let err = dispatcher
        .send_many(
            TENANT,
            "never-created",
            &recipients(1),
            "hello",
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotFound(ref number) if number == "never-created"));
    assert!(runtime.created().await.is_empty());
    assert!(store
        .list_messages(TENANT, "never-created", 10)
        .await
        .unwrap()
        .is_empty());
}
