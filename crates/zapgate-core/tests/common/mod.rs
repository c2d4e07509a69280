// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for zapgate-core integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use zapgate_core::lifecycle::{DeviceLifecycle, LifecycleConfig};
use zapgate_core::registry::DeviceRegistry;
use zapgate_core::runtime::MockRuntime;

/// Lifecycle config with a short health gate.
pub fn fast_config() -> LifecycleConfig {
    LifecycleConfig {
        health_timeout: Duration::from_millis(600),
        health_interval: Duration::from_millis(50),
        ..LifecycleConfig::default()
    }
}

/// A stand-in device runtime answering `GET /health` with 200.
pub async fn healthy_device() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "ok"})))
        .mount(&server)
        .await;
    server
}

/// A stand-in device runtime that never becomes healthy.
pub async fn unhealthy_device() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    server
}

/// Lifecycle manager over a mock runtime.
pub fn lifecycle(runtime: Arc<MockRuntime>) -> DeviceLifecycle {
    DeviceLifecycle::new(
        Arc::new(DeviceRegistry::new(runtime.clone())),
        runtime,
        reqwest::Client::new(),
        fast_config(),
    )
}
