// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory store.
//!
//! Same semantics as the PostgreSQL store, without durability.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::*;

#[derive(Debug, Clone)]
struct StoredWebhook {
    tenant_id: String,
    device_number: String,
    rule: WebhookRule,
    deleted: bool,
}

#[derive(Default)]
struct MemoryState {
    devices: Vec<DeviceRecord>,
    webhooks: Vec<StoredWebhook>,
    messages: Vec<MessageRecord>,
    event_logs: Vec<EventLogEntry>,
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first<T, F>(items: impl Iterator<Item = T>, limit: i64, key: F) -> Vec<T>
where
    F: Fn(&T) -> (chrono::DateTime<Utc>, Option<i64>),
{
    let mut items: Vec<T> = items.collect();
    items.sort_by_key(|item| std::cmp::Reverse(key(item)));
    items.truncate(limit.max(0) as usize);
    items
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn get_device(&self, tenant_id: &str, number: &str) -> Result<Option<DeviceRecord>> {
        let state = self.state.read().await;
        Ok(state
            .devices
            .iter()
            .find(|d| d.tenant_id == tenant_id && d.number == number && d.deleted_at.is_none())
            .cloned())
    }

    async fn get_device_by_id(&self, id: i64) -> Result<Option<DeviceRecord>> {
        let state = self.state.read().await;
        Ok(state.devices.iter().find(|d| d.id == id).cloned())
    }

    async fn upsert_device(&self, device: &UpsertDevice) -> Result<DeviceRecord> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        if let Some(existing) = state
            .devices
            .iter_mut()
            .find(|d| d.tenant_id == device.tenant_id && d.number == device.number)
        {
            if device.container_id.is_some() {
                existing.container_id = device.container_id.clone();
            }
            if device.endpoint.is_some() {
                existing.endpoint = device.endpoint.clone();
            }
            if device.version.is_some() {
                existing.version = device.version.clone();
            }
            existing.deleted_at = None;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let record = DeviceRecord {
            id: state.devices.len() as i64 + 1,
            tenant_id: device.tenant_id.clone(),
            number: device.number.clone(),
            container_id: device.container_id.clone(),
            endpoint: device.endpoint.clone(),
            version: device.version.clone(),
            session: None,
            connected: false,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        state.devices.push(record.clone());
        Ok(record)
    }

    async fn soft_delete_device(&self, tenant_id: &str, number: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        match state
            .devices
            .iter_mut()
            .find(|d| d.tenant_id == tenant_id && d.number == number && d.deleted_at.is_none())
        {
            Some(device) => {
                device.deleted_at = Some(now);
                device.updated_at = now;
                device.connected = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_session(&self, id: i64, session: Option<&[u8]>, connected: bool) -> Result<()> {
        let mut state = self.state.write().await;
        let device = state
            .devices
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("device {}", id)))?;
        device.session = session.map(<[u8]>::to_vec);
        device.connected = connected;
        device.updated_at = Utc::now();
        Ok(())
    }

    async fn set_connected(&self, id: i64, connected: bool) -> Result<()> {
        let mut state = self.state.write().await;
        let device = state
            .devices
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("device {}", id)))?;
        device.connected = connected;
        device.updated_at = Utc::now();
        Ok(())
    }

    async fn list_webhooks(&self, tenant_id: &str, device_number: &str) -> Result<Vec<WebhookRule>> {
        let state = self.state.read().await;
        Ok(state
            .webhooks
            .iter()
            .filter(|w| !w.deleted && w.tenant_id == tenant_id && w.device_number == device_number)
            .map(|w| w.rule.clone())
            .collect())
    }

    async fn insert_webhook(
        &self,
        tenant_id: &str,
        device_number: &str,
        rule: &WebhookRule,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let key = rule.key();
        let duplicate = state.webhooks.iter().any(|w| {
            !w.deleted
                && w.tenant_id == tenant_id
                && w.device_number == device_number
                && w.rule.key() == key
        });
        if duplicate {
            return Ok(false);
        }
        state.webhooks.push(StoredWebhook {
            tenant_id: tenant_id.to_string(),
            device_number: device_number.to_string(),
            rule: rule.clone(),
            deleted: false,
        });
        Ok(true)
    }

    async fn delete_webhook(
        &self,
        tenant_id: &str,
        device_number: &str,
        rule: &WebhookRule,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let key = rule.key();
        let mut deleted = false;
        for stored in state.webhooks.iter_mut().filter(|w| {
            !w.deleted
                && w.tenant_id == tenant_id
                && w.device_number == device_number
                && w.rule.key() == key
        }) {
            stored.deleted = true;
            deleted = true;
        }
        Ok(deleted)
    }

    async fn record_message(&self, message: &MessageRecord) -> Result<()> {
        let mut state = self.state.write().await;
        let mut message = message.clone();
        message.id = Some(state.messages.len() as i64 + 1);
        state.messages.push(message);
        Ok(())
    }

    async fn list_messages(
        &self,
        tenant_id: &str,
        device_number: &str,
        limit: i64,
    ) -> Result<Vec<MessageRecord>> {
        let state = self.state.read().await;
        let matching = state
            .messages
            .iter()
            .filter(|m| m.tenant_id == tenant_id && m.device_number == device_number)
            .cloned();
        Ok(newest_first(matching, limit, |m| (m.created_at, m.id)))
    }

    async fn insert_event_log(&self, entry: &EventLogEntry) -> Result<()> {
        let mut state = self.state.write().await;
        let mut entry = entry.clone();
        entry.id = Some(state.event_logs.len() as i64 + 1);
        state.event_logs.push(entry);
        Ok(())
    }

    async fn list_event_logs(&self, number: Option<&str>, limit: i64) -> Result<Vec<EventLogEntry>> {
        let state = self.state.read().await;
        let matching = state
            .event_logs
            .iter()
            .filter(|e| number.is_none_or(|n| e.number.as_deref() == Some(n)))
            .cloned();
        Ok(newest_first(matching, limit, |e| (e.created_at, e.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(phrase: &str) -> WebhookRule {
        WebhookRule {
            phrase: phrase.to_string(),
            callback_url: "http://cb.local/hook".to_string(),
            method: "POST".to_string(),
            body: String::new(),
            number: "5511".to_string(),
        }
    }

    #[tokio::test]
    async fn test_upsert_keeps_unset_fields_and_revives() {
        let store = MemoryStore::new();
        let created = store
            .upsert_device(&UpsertDevice {
                tenant_id: "t1".into(),
                number: "5511".into(),
                container_id: Some("c1".into()),
                endpoint: Some("http://127.0.0.1:40000".into()),
                version: Some("1.0".into()),
            })
            .await
            .unwrap();

        assert!(store.soft_delete_device("t1", "5511").await.unwrap());
        assert!(store.get_device("t1", "5511").await.unwrap().is_none());
        assert!(!store.soft_delete_device("t1", "5511").await.unwrap());

        let revived = store
            .upsert_device(&UpsertDevice {
                tenant_id: "t1".into(),
                number: "5511".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(revived.id, created.id);
        assert_eq!(revived.container_id.as_deref(), Some("c1"));
        assert!(revived.deleted_at.is_none());
    }

    #[tokio::test]
    async fn test_webhooks_deduplicate_by_identity() {
        let store = MemoryStore::new();
        assert!(store.insert_webhook("t1", "5511", &rule("oi")).await.unwrap());
        assert!(!store.insert_webhook("t1", "5511", &rule("oi")).await.unwrap());
        assert!(store.insert_webhook("t1", "5511", &rule("tchau")).await.unwrap());
        assert!(store.list_webhooks("t2", "5511").await.unwrap().is_empty());

        assert!(store.delete_webhook("t1", "5511", &rule("oi")).await.unwrap());
        let remaining = store.list_webhooks("t1", "5511").await.unwrap();
        assert_eq!(remaining, vec![rule("tchau")]);
    }

    #[tokio::test]
    async fn test_event_logs_filter_and_limit() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .insert_event_log(&EventLogEntry {
                    id: None,
                    number: Some(if i % 2 == 0 { "a" } else { "b" }.to_string()),
                    ip: "10.0.0.1".into(),
                    method: "POST".into(),
                    endpoint: "/create".into(),
                    user_agent: "test".into(),
                    status_code: 201,
                    request_body: None,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        assert_eq!(store.list_event_logs(None, 10).await.unwrap().len(), 5);
        assert_eq!(store.list_event_logs(None, 2).await.unwrap().len(), 2);
        let only_a = store.list_event_logs(Some("a"), 10).await.unwrap();
        assert_eq!(only_a.len(), 3);
        // Newest first.
        assert!(only_a[0].id > only_a[1].id);
    }

    #[tokio::test]
    async fn test_update_session_unknown_device() {
        let store = MemoryStore::new();
        let err = store.update_session(42, None, true).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
