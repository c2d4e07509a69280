// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared handler state.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use zapgate_core::dispatch::BulkDispatcher;
use zapgate_core::lifecycle::DeviceLifecycle;
use zapgate_core::session::SessionBridge;
use zapgate_core::store::DeviceStore;
use zapgate_core::webhook::WebhookReconciler;

use crate::metrics::GatewayMetrics;

/// State shared by all HTTP handlers.
pub struct AppState {
    /// Tenant owning the devices served by this gateway
    pub tenant_id: String,
    /// Device, webhook, message and event-log repository
    pub store: Arc<dyn DeviceStore>,
    /// Device container lifecycle
    pub lifecycle: Arc<DeviceLifecycle>,
    /// Webhook reconciliation
    pub reconciler: Arc<WebhookReconciler>,
    /// Messaging sessions
    pub bridge: Arc<SessionBridge>,
    /// Bulk sends
    pub dispatcher: Arc<BulkDispatcher>,
    /// Client used to forward proxied requests
    pub http: reqwest::Client,
    /// Largest request body buffered
    pub max_body_bytes: usize,
    /// Allowed CORS origins; empty means any
    pub cors_origins: Vec<String>,
    /// Prometheus metrics
    pub metrics: Arc<GatewayMetrics>,
    /// Fires when the server shuts down
    pub shutdown: CancellationToken,
    /// Server version
    pub version: String,
    /// When the server started
    pub start_time: Instant,
}

impl AppState {
    /// Milliseconds since the server started.
    pub fn uptime_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Image tag new device containers are created from.
    pub fn image_version(&self) -> &str {
        self.lifecycle.config().image_version()
    }
}
