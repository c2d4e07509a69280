// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Zapgate Core - Device Orchestration and Dispatch
//!
//! This crate gives every WhatsApp number ("device") its own isolated,
//! independently restartable backing runtime (a container), keeps track of
//! where each runtime lives, reconciles webhook rules into it, and fans out
//! bulk messages through it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         zapgate-server (HTTP)                            │
//! │        /create  /delete  /device/{number}/*  /send/many                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       zapgate-core (This Crate)                          │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐     │
//! │  │   Device    │  │   Device    │  │   Webhook   │  │    Bulk     │     │
//! │  │  Lifecycle  │  │  Registry   │  │ Reconciler  │  │ Dispatcher  │     │
//! │  └─────────────┘  └─────────────┘  └─────────────┘  └─────────────┘     │
//! │         │                │                               │              │
//! │         ▼                ▼                               ▼              │
//! │  ┌──────────────────────────────┐              ┌──────────────────┐     │
//! │  │  Container Runtime Adapter   │              │  Session Bridge  │     │
//! │  └──────────────────────────────┘              └──────────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                  │ docker run / stop / rm              │
//!                  ▼                                     ▼
//!       ┌─────────────────────────┐            ┌──────────────────┐
//!       │  Device runtimes        │            │    PostgreSQL    │
//!       │  (one container/number) │            │ devices, webhooks│
//!       └─────────────────────────┘            │ messages, logs   │
//!                                              └──────────────────┘
//! ```
//!
//! # Device runtime contract
//!
//! | Endpoint | Description |
//! |----------|-------------|
//! | `GET /health` | `200` once the runtime is ready |
//! | `POST /webhook/list` | `{ "<number>": [rule, ...] }` |
//! | `POST /webhook/register` | register one normalized rule |
//! | `POST /send` | send `{number, message}` through the device session |
//!
//! # Modules
//!
//! - [`config`]: Environment parsing helpers and configuration errors
//! - [`error`]: Error taxonomy for orchestration and dispatch
//! - [`runtime`]: Container runtime adapter (Docker CLI, mock)
//! - [`registry`]: In-memory device → container map with runtime fallback
//! - [`lifecycle`]: Create-or-reuse, health gate, teardown
//! - [`health`]: Readiness probing of device runtimes
//! - [`webhook`]: Webhook rules and additive reconciliation
//! - [`messaging`]: Messaging client capability and its event model
//! - [`session`]: Session persistence bridge
//! - [`dispatch`]: Bulk dispatch worker pool
//! - [`store`]: Repository for devices, webhooks, messages and event logs

#![deny(missing_docs)]

/// Environment parsing helpers and configuration errors.
pub mod config;

/// Error types for orchestration and dispatch.
pub mod error;

/// Container runtime adapter (Docker CLI backend and mock backend).
pub mod runtime;

/// Device registry: identity → running container descriptor.
pub mod registry;

/// Device lifecycle manager.
pub mod lifecycle;

/// Health gate for freshly started device runtimes.
pub mod health;

/// Webhook rules and reconciliation against device runtimes.
pub mod webhook;

/// Messaging client capability.
pub mod messaging;

/// Session persistence bridge.
pub mod session;

/// Bulk dispatch engine.
pub mod dispatch;

/// Repository for devices, webhooks, message history and event logs.
pub mod store;

pub use error::{Error, Result};
