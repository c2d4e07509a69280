// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Device lifecycle tests against the mock runtime.

mod common;

use std::sync::Arc;

use zapgate_core::Error;
use zapgate_core::error::ProvisioningStage;
use zapgate_core::lifecycle::Removal;
use zapgate_core::runtime::MockRuntime;

use common::*;

#[tokio::test]
async fn test_create_then_reuse_starts_one_container() {
    let device = healthy_device().await;
    let runtime = Arc::new(MockRuntime::with_port(device.address().port()));
    let lifecycle = lifecycle(runtime.clone());

    let first = lifecycle.create_or_reuse("5511999990001").await.unwrap();
    let second = lifecycle.create_or_reuse("5511999990001").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(runtime.created().await.len(), 1);
    assert_eq!(first.port, device.address().port());
    assert_eq!(
        lifecycle.registry().cached("5511999990001"),
        Some(first.clone())
    );
}

#[tokio::test]
async fn test_concurrent_creates_share_one_container() {
    let device = healthy_device().await;
    let runtime = Arc::new(MockRuntime::with_port(device.address().port()));
    let lifecycle = Arc::new(lifecycle(runtime.clone()));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let lifecycle = lifecycle.clone();
        handles.push(tokio::spawn(async move {
            lifecycle.create_or_reuse("5511999990002").await
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().id);
    }
    ids.dedup();

    assert_eq!(ids.len(), 1);
    assert_eq!(runtime.created().await.len(), 1);
}

#[tokio::test]
async fn test_stopped_labelled_container_is_restarted_not_recreated() {
    let device = healthy_device().await;
    let runtime = Arc::new(MockRuntime::new());
    let existing = runtime
        .seed_container("5511999990003", false, device.address().port())
        .await;
    let lifecycle = lifecycle(runtime.clone());

    let descriptor = lifecycle.create_or_reuse("5511999990003").await.unwrap();

    assert_eq!(descriptor.id, existing);
    assert_eq!(runtime.started().await, vec![existing.clone()]);
    assert!(runtime.created().await.is_empty());
    assert!(runtime.is_running(&existing).await);
}

#[tokio::test]
async fn test_adopted_container_is_not_health_gated() {
    let device = unhealthy_device().await;
    let runtime = Arc::new(MockRuntime::new());
    let existing = runtime
        .seed_container("5511999990012", true, device.address().port())
        .await;
    let lifecycle = lifecycle(runtime.clone());

    let descriptor = lifecycle.create_or_reuse("5511999990012").await.unwrap();

    assert_eq!(descriptor.id, existing);
    assert!(runtime.stopped().await.is_empty());
    assert!(runtime.removed().await.is_empty());
    assert!(runtime.created().await.is_empty());
    assert!(runtime.exists(&existing).await);
    assert_eq!(
        lifecycle.registry().cached("5511999990012"),
        Some(descriptor)
    );
}

#[tokio::test]
async fn test_health_timeout_rolls_back_once() {
    let device = unhealthy_device().await;
    let runtime = Arc::new(MockRuntime::with_port(device.address().port()));
    let lifecycle = lifecycle(runtime.clone());

    let err = lifecycle.create_or_reuse("5511999990004").await.unwrap_err();
    let Error::HealthCheckTimeout { container_id, .. } = err else {
        panic!("expected HealthCheckTimeout, got {:?}", err);
    };

    assert_eq!(runtime.stopped().await, vec![container_id.clone()]);
    assert_eq!(runtime.removed().await, vec![container_id.clone()]);
    assert!(!runtime.exists(&container_id).await);
    assert!(lifecycle.registry().cached("5511999990004").is_none());
}

#[tokio::test]
async fn test_image_pull_failure_creates_nothing() {
    let runtime = Arc::new(MockRuntime::new().with_pull_error("pull access denied"));
    let lifecycle = lifecycle(runtime.clone());

    let err = lifecycle.create_or_reuse("5511999990005").await.unwrap_err();

    assert!(matches!(
        err,
        Error::Provisioning {
            stage: ProvisioningStage::ImagePull,
            ..
        }
    ));
    assert_eq!(runtime.container_count().await, 0);
    assert!(lifecycle.registry().is_empty());
}

#[tokio::test]
async fn test_empty_identity_is_rejected() {
    let runtime = Arc::new(MockRuntime::new());
    let lifecycle = lifecycle(runtime);
    assert!(matches!(
        lifecycle.create_or_reuse("  ").await,
        Err(Error::Validation(_))
    ));
}

#[tokio::test]
async fn test_remove_is_idempotent() {
    let device = healthy_device().await;
    let runtime = Arc::new(MockRuntime::with_port(device.address().port()));
    let lifecycle = lifecycle(runtime.clone());

    let descriptor = lifecycle.create_or_reuse("5511999990006").await.unwrap();

    let first = lifecycle.remove("5511999990006").await.unwrap();
    assert_eq!(
        first,
        Removal::Removed {
            container_id: descriptor.id.clone()
        }
    );
    assert!(lifecycle.registry().cached("5511999990006").is_none());
    assert!(!runtime.exists(&descriptor.id).await);

    let second = lifecycle.remove("5511999990006").await.unwrap();
    assert_eq!(second, Removal::AlreadyRemoved);
    assert_eq!(runtime.removed().await.len(), 1);
}

#[tokio::test]
async fn test_remove_unknown_device_is_not_found() {
    let runtime = Arc::new(MockRuntime::new());
    let lifecycle = lifecycle(runtime);
    assert!(matches!(
        lifecycle.remove("5511999990007").await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_remove_tolerates_missing_container_and_stop_failure() {
    let device = healthy_device().await;
    let runtime = Arc::new(
        MockRuntime::with_port(device.address().port())
            .with_stop_error("container is paused")
            .with_remove_error("Error response from daemon: No such container: x"),
    );
    let lifecycle = lifecycle(runtime.clone());

    lifecycle.create_or_reuse("5511999990008").await.unwrap();
    let removal = lifecycle.remove("5511999990008").await.unwrap();

    assert!(matches!(removal, Removal::Removed { .. }));
    assert!(lifecycle.registry().cached("5511999990008").is_none());
}

#[tokio::test]
async fn test_remove_surfaces_other_runtime_errors() {
    let device = healthy_device().await;
    let runtime =
        Arc::new(MockRuntime::with_port(device.address().port()).with_remove_error("permission denied"));
    let lifecycle = lifecycle(runtime.clone());

    lifecycle.create_or_reuse("5511999990009").await.unwrap();
    let err = lifecycle.remove("5511999990009").await.unwrap_err();

    assert!(matches!(err, Error::Teardown { .. }));
    // The entry is gone before the runtime is asked to remove anything.
    assert!(lifecycle.registry().cached("5511999990009").is_none());
}

#[tokio::test]
async fn test_create_after_remove_provisions_again() {
    let device = healthy_device().await;
    let runtime = Arc::new(MockRuntime::with_port(device.address().port()));
    let lifecycle = lifecycle(runtime.clone());

    let first = lifecycle.create_or_reuse("5511999990010").await.unwrap();
    lifecycle.remove("5511999990010").await.unwrap();
    let second = lifecycle.create_or_reuse("5511999990010").await.unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(runtime.created().await.len(), 2);
}

#[tokio::test]
async fn test_container_start_failure_is_reported_by_stage() {
    let runtime = Arc::new(MockRuntime::new().with_create_error("port is already allocated"));
    let lifecycle = lifecycle(runtime.clone());

    let err = lifecycle.create_or_reuse("5511999990011").await.unwrap_err();

    assert!(matches!(
        err,
        Error::Provisioning {
            stage: ProvisioningStage::ContainerStart,
            ..
        }
    ));
    assert!(lifecycle.registry().is_empty());
}
