// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Zapgate Server - HTTP Gateway for Device Runtimes
//!
//! Exposes the device lifecycle, a transparent per-device proxy and bulk
//! sending over HTTP.
//!
//! # Endpoints
//!
//! | Route | Description |
//! |-------|-------------|
//! | `GET /health` | Liveness, version and uptime |
//! | `GET /metrics` | Prometheus metrics |
//! | `POST /create` | Create or reuse a device container, replay its webhooks |
//! | `DELETE /delete` | Tear a device down (idempotent) |
//! | `PUT /update` | Recreate a device on the current image version |
//! | `GET /devices/{number}` | Stored device record |
//! | `ANY /device/{number}/*` | Forward to the device runtime |
//! | `POST /send/many` | Send one text to up to 100 recipients |
//! | `GET /logs` | Recent request event log |
//! | `GET /logs/number` | Event log for one device |
//!
//! # Modules
//!
//! - [`config`]: Environment configuration
//! - [`error`]: HTTP error mapping
//! - [`state`]: Shared handler state
//! - [`handlers`]: Lifecycle, dispatch and log handlers
//! - [`proxy`]: Device proxy with webhook registration interception
//! - [`middleware`]: Request event log
//! - [`metrics`]: Prometheus metrics
//! - [`server`]: Router and serve loop
//! - [`runtime`]: Embeddable [`GatewayRuntime`](runtime::GatewayRuntime)

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod proxy;
pub mod runtime;
pub mod server;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use runtime::GatewayRuntime;
