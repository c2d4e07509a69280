// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed store.

use async_trait::async_trait;
use sqlx::PgPool;

use super::*;

const DEVICE_COLUMNS: &str = "id, tenant_id, number, container_id, endpoint, version, session, \
     connected, created_at, updated_at, deleted_at";

#[derive(sqlx::FromRow)]
struct WebhookRow {
    phrase: String,
    callback_url: String,
    url_method: String,
    body: String,
    number: String,
}

impl From<WebhookRow> for WebhookRule {
    fn from(row: WebhookRow) -> Self {
        WebhookRule {
            phrase: row.phrase,
            callback_url: row.callback_url,
            method: row.url_method,
            body: row.body,
            number: row.number,
        }
    }
}

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the schema. Safe to run on every startup.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../../migrations/schema.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DeviceStore for PostgresStore {
    async fn get_device(&self, tenant_id: &str, number: &str) -> Result<Option<DeviceRecord>> {
        let record = sqlx::query_as::<_, DeviceRecord>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices \
             WHERE tenant_id = $1 AND number = $2 AND deleted_at IS NULL"
        ))
        .bind(tenant_id)
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn get_device_by_id(&self, id: i64) -> Result<Option<DeviceRecord>> {
        let record = sqlx::query_as::<_, DeviceRecord>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn upsert_device(&self, device: &UpsertDevice) -> Result<DeviceRecord> {
        let record = sqlx::query_as::<_, DeviceRecord>(&format!(
            r#"
            INSERT INTO devices (tenant_id, number, container_id, endpoint, version)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (tenant_id, number) DO UPDATE SET
                container_id = COALESCE(EXCLUDED.container_id, devices.container_id),
                endpoint     = COALESCE(EXCLUDED.endpoint, devices.endpoint),
                version      = COALESCE(EXCLUDED.version, devices.version),
                deleted_at   = NULL,
                updated_at   = NOW()
            RETURNING {DEVICE_COLUMNS}
            "#
        ))
        .bind(&device.tenant_id)
        .bind(&device.number)
        .bind(&device.container_id)
        .bind(&device.endpoint)
        .bind(&device.version)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    async fn soft_delete_device(&self, tenant_id: &str, number: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE devices
            SET deleted_at = NOW(), updated_at = NOW(), connected = FALSE
            WHERE tenant_id = $1 AND number = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id)
        .bind(number)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_session(&self, id: i64, session: Option<&[u8]>, connected: bool) -> Result<()> {
        let result = sqlx::query(
            "UPDATE devices SET session = $2, connected = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(session)
        .bind(connected)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("device {}", id)));
        }
        Ok(())
    }

    async fn set_connected(&self, id: i64, connected: bool) -> Result<()> {
        let result =
            sqlx::query("UPDATE devices SET connected = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(connected)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("device {}", id)));
        }
        Ok(())
    }

    async fn list_webhooks(&self, tenant_id: &str, device_number: &str) -> Result<Vec<WebhookRule>> {
        let rows = sqlx::query_as::<_, WebhookRow>(
            r#"
            SELECT phrase, callback_url, url_method, body, number
            FROM device_webhooks
            WHERE tenant_id = $1 AND device_number = $2 AND deleted_at IS NULL
            ORDER BY id
            "#,
        )
        .bind(tenant_id)
        .bind(device_number)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(WebhookRule::from).collect())
    }

    async fn insert_webhook(
        &self,
        tenant_id: &str,
        device_number: &str,
        rule: &WebhookRule,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO device_webhooks
                (tenant_id, device_number, number, phrase, callback_url, url_method, body)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (tenant_id, device_number, phrase, callback_url, url_method, number)
                WHERE deleted_at IS NULL
            DO NOTHING
            "#,
        )
        .bind(tenant_id)
        .bind(device_number)
        .bind(&rule.number)
        .bind(&rule.phrase)
        .bind(&rule.callback_url)
        .bind(&rule.method)
        .bind(&rule.body)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_webhook(
        &self,
        tenant_id: &str,
        device_number: &str,
        rule: &WebhookRule,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE device_webhooks SET deleted_at = NOW()
            WHERE tenant_id = $1 AND device_number = $2
              AND phrase = $3 AND callback_url = $4 AND url_method = $5 AND number = $6
              AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id)
        .bind(device_number)
        .bind(&rule.phrase)
        .bind(&rule.callback_url)
        .bind(&rule.method)
        .bind(&rule.number)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_message(&self, message: &MessageRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO messages
                (tenant_id, device_number, recipient, body, status, error, message_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&message.tenant_id)
        .bind(&message.device_number)
        .bind(&message.recipient)
        .bind(&message.body)
        .bind(&message.status)
        .bind(&message.error)
        .bind(&message.message_id)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_messages(
        &self,
        tenant_id: &str,
        device_number: &str,
        limit: i64,
    ) -> Result<Vec<MessageRecord>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, tenant_id, device_number, recipient, body, status, error, message_id, created_at
            FROM messages
            WHERE tenant_id = $1 AND device_number = $2
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#,
        )
        .bind(tenant_id)
        .bind(device_number)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn insert_event_log(&self, entry: &EventLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO event_logs
                (number, ip, method, endpoint, user_agent, status_code, request_body, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&entry.number)
        .bind(&entry.ip)
        .bind(&entry.method)
        .bind(&entry.endpoint)
        .bind(&entry.user_agent)
        .bind(entry.status_code)
        .bind(&entry.request_body)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_event_logs(&self, number: Option<&str>, limit: i64) -> Result<Vec<EventLogEntry>> {
        let entries = sqlx::query_as::<_, EventLogEntry>(
            r#"
            SELECT id, number, ip, method, endpoint, user_agent, status_code, request_body, created_at
            FROM event_logs
            WHERE ($1::text IS NULL OR number = $1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(number)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}
