// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Repository for devices, webhook rules, message history and event logs.
//!
//! Two backends implement [`DeviceStore`]:
//!
//! - [`PostgresStore`]: durable storage, schema in `migrations/schema.sql`
//! - [`MemoryStore`]: process-local storage for tests and single-node runs

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use crate::webhook::WebhookRule;

/// Errors from store operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Record does not exist.
    #[error("Record not found: {0}")]
    NotFound(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Device record.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DeviceRecord {
    /// Database primary key.
    pub id: i64,
    /// Owning tenant.
    pub tenant_id: String,
    /// Device identity (phone number).
    pub number: String,
    /// Container serving the device, when known.
    pub container_id: Option<String>,
    /// Base URL of the device runtime, when known.
    pub endpoint: Option<String>,
    /// Image version the container was created from.
    pub version: Option<String>,
    /// Opaque messaging session blob.
    #[serde(skip)]
    pub session: Option<Vec<u8>>,
    /// Whether the messaging session is connected.
    pub connected: bool,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// Last change.
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Fields written by [`DeviceStore::upsert_device`]. `None` keeps the
/// stored value.
#[derive(Debug, Clone, Default)]
pub struct UpsertDevice {
    /// Owning tenant.
    pub tenant_id: String,
    /// Device identity.
    pub number: String,
    /// Serving container.
    pub container_id: Option<String>,
    /// Runtime base URL.
    pub endpoint: Option<String>,
    /// Image version.
    pub version: Option<String>,
}

/// Outcome of one send, as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    /// Delivered to the transport.
    Sent,
    /// Failed for a reason other than session expiry.
    Failed,
    /// Device session expired; re-authentication needed.
    DeviceExpired,
}

impl SendStatus {
    /// Stored text form.
    pub fn as_str(&self) -> &'static str {
        match self {
            SendStatus::Sent => "sent",
            SendStatus::Failed => "failed",
            SendStatus::DeviceExpired => "device_expired",
        }
    }
}

impl std::fmt::Display for SendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message history record.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MessageRecord {
    /// Database primary key (None when inserting).
    #[sqlx(default)]
    pub id: Option<i64>,
    /// Owning tenant.
    pub tenant_id: String,
    /// Sending device.
    pub device_number: String,
    /// Recipient number.
    pub recipient: String,
    /// Message text.
    pub body: String,
    /// `sent`, `failed` or `device_expired`.
    pub status: String,
    /// Failure text.
    pub error: Option<String>,
    /// Transport message ID.
    pub message_id: Option<String>,
    /// When the outcome was recorded.
    pub created_at: DateTime<Utc>,
}

/// HTTP request audit entry.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EventLogEntry {
    /// Database primary key (None when inserting).
    #[sqlx(default)]
    pub id: Option<i64>,
    /// Device the request concerned, if any.
    pub number: Option<String>,
    /// Client address.
    pub ip: String,
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub endpoint: String,
    /// User agent header.
    pub user_agent: String,
    /// Response status.
    pub status_code: i32,
    /// Request body, when captured.
    pub request_body: Option<String>,
    /// When the request finished.
    pub created_at: DateTime<Utc>,
}

/// Storage operations used by the gateway.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Live (not soft-deleted) device by tenant and number.
    async fn get_device(&self, tenant_id: &str, number: &str) -> Result<Option<DeviceRecord>>;

    /// Device by primary key, including soft-deleted ones.
    async fn get_device_by_id(&self, id: i64) -> Result<Option<DeviceRecord>>;

    /// Insert a device or update the existing one, clearing any soft delete.
    async fn upsert_device(&self, device: &UpsertDevice) -> Result<DeviceRecord>;

    /// Soft-delete a device. Returns whether a live record was found.
    async fn soft_delete_device(&self, tenant_id: &str, number: &str) -> Result<bool>;

    /// Replace the session blob and connected flag, stamping `updated_at`.
    async fn update_session(&self, id: i64, session: Option<&[u8]>, connected: bool) -> Result<()>;

    /// Flip the connected flag only.
    async fn set_connected(&self, id: i64, connected: bool) -> Result<()>;

    /// Desired webhook rules for a device, oldest first.
    async fn list_webhooks(&self, tenant_id: &str, device_number: &str) -> Result<Vec<WebhookRule>>;

    /// Add a rule. Returns false if an identical rule already exists.
    async fn insert_webhook(
        &self,
        tenant_id: &str,
        device_number: &str,
        rule: &WebhookRule,
    ) -> Result<bool>;

    /// Soft-delete a rule by identity. Returns whether one was deleted.
    async fn delete_webhook(
        &self,
        tenant_id: &str,
        device_number: &str,
        rule: &WebhookRule,
    ) -> Result<bool>;

    /// Append a send outcome.
    async fn record_message(&self, message: &MessageRecord) -> Result<()>;

    /// Most recent send outcomes for a device, newest first.
    async fn list_messages(
        &self,
        tenant_id: &str,
        device_number: &str,
        limit: i64,
    ) -> Result<Vec<MessageRecord>>;

    /// Append an audit entry.
    async fn insert_event_log(&self, entry: &EventLogEntry) -> Result<()>;

    /// Most recent audit entries, newest first, optionally for one number.
    async fn list_event_logs(&self, number: Option<&str>, limit: i64) -> Result<Vec<EventLogEntry>>;
}
