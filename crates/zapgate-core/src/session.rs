// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Session persistence bridge.
//!
//! Keeps the device repository in step with messaging client events: a
//! `Connected` event stores the session blob and sets the connected flag; a
//! `Disconnected` event clears the flag and keeps the blob so the device can
//! reconnect without re-pairing.
//!
//! The bridge also owns the per-device client cache used by bulk dispatch.

use std::sync::{Arc, Weak};

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::messaging::{ClientContext, ClientEvent, MessagingClient, MessagingClientFactory};
use crate::store::{DeviceRecord, DeviceStore, MessageRecord, SendStatus, UpsertDevice};

/// Outcome of one send, handed to the bridge for persistence.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    /// Recipient number.
    pub recipient: String,
    /// Classified status.
    pub status: SendStatus,
    /// Failure text, for failed and expired sends.
    pub error: Option<String>,
    /// Transport message ID, for successful sends.
    pub message_id: Option<String>,
}

fn client_key(tenant_id: &str, number: &str) -> String {
    format!("{}/{}", tenant_id, number)
}

/// Bridge between messaging clients and the device repository.
pub struct SessionBridge {
    store: Arc<dyn DeviceStore>,
    factory: Arc<dyn MessagingClientFactory>,
    clients: DashMap<String, Arc<dyn MessagingClient>>,
}

impl SessionBridge {
    /// Create a bridge.
    pub fn new(store: Arc<dyn DeviceStore>, factory: Arc<dyn MessagingClientFactory>) -> Self {
        Self {
            store,
            factory,
            clients: DashMap::new(),
        }
    }

    /// Device repository.
    pub fn store(&self) -> &Arc<dyn DeviceStore> {
        &self.store
    }

    /// Mark a device connected, creating its record if needed and storing the
    /// session blob when one is given.
    pub async fn on_connected(
        &self,
        tenant_id: &str,
        number: &str,
        session: Option<Vec<u8>>,
    ) -> Result<DeviceRecord> {
        let record = match self.store.get_device(tenant_id, number).await? {
            Some(record) => record,
            None => {
                self.store
                    .upsert_device(&UpsertDevice {
                        tenant_id: tenant_id.to_string(),
                        number: number.to_string(),
                        ..Default::default()
                    })
                    .await?
            }
        };

        let blob = session.or_else(|| record.session.clone());
        self.store
            .update_session(record.id, blob.as_deref(), true)
            .await?;

        info!(tenant_id = %tenant_id, number = %number, device_id = record.id, "Device connected");
        Ok(DeviceRecord {
            session: blob,
            connected: true,
            updated_at: Utc::now(),
            ..record
        })
    }

    /// Clear the connected flag. The stored session blob is kept.
    pub async fn on_disconnected(&self, device_id: i64) -> Result<()> {
        self.store.set_connected(device_id, false).await?;
        info!(device_id, "Device disconnected");
        Ok(())
    }

    /// Live device record by tenant and number.
    pub async fn find_by_tenant_and_number(
        &self,
        tenant_id: &str,
        number: &str,
    ) -> Result<Option<DeviceRecord>> {
        Ok(self.store.get_device(tenant_id, number).await?)
    }

    /// Stored session blob for a device.
    pub async fn get_session_bytes(&self, tenant_id: &str, number: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .store
            .get_device(tenant_id, number)
            .await?
            .and_then(|record| record.session))
    }

    /// Apply one client event to the repository.
    pub async fn handle_event(
        &self,
        tenant_id: &str,
        number: &str,
        event: ClientEvent,
        session: Option<Vec<u8>>,
    ) -> Result<()> {
        match event {
            ClientEvent::Connected => {
                self.on_connected(tenant_id, number, session).await?;
            }
            ClientEvent::Disconnected { reason } => {
                match self.store.get_device(tenant_id, number).await? {
                    Some(record) => {
                        if let Some(reason) = &reason {
                            debug!(number = %number, reason = %reason, "Disconnect reason");
                        }
                        self.on_disconnected(record.id).await?;
                    }
                    None => debug!(number = %number, "Disconnect for unknown device"),
                }
            }
            ClientEvent::Other(name) => {
                debug!(number = %number, event = %name, "Client event");
            }
        }
        Ok(())
    }

    /// Messaging client for a device, opening and connecting one if needed.
    ///
    /// A client that fails to connect is still returned; callers check
    /// [`MessagingClient::is_connected`].
    pub async fn client_for(
        self: &Arc<Self>,
        tenant_id: &str,
        number: &str,
    ) -> Result<Arc<dyn MessagingClient>> {
        let key = client_key(tenant_id, number);

        let cached = self.clients.get(&key).map(|c| c.value().clone());
        if let Some(client) = cached {
            if !client.is_connected()
                && let Err(e) = client.connect().await
            {
                warn!(number = %number, error = %e, "Reconnect failed");
            }
            return Ok(client);
        }

        let session = self.get_session_bytes(tenant_id, number).await?;
        let client = self
            .factory
            .open(&ClientContext {
                tenant_id: tenant_id.to_string(),
                number: number.to_string(),
                session,
            })
            .await?;

        self.subscribe(&client, tenant_id, number);
        let client = self.clients.entry(key).or_insert(client).value().clone();

        if let Err(e) = client.connect().await {
            warn!(number = %number, error = %e, "Messaging client failed to connect");
        }
        Ok(client)
    }

    /// Route a client's events into the repository. Events are applied one
    /// at a time in the order the client emitted them.
    fn subscribe(self: &Arc<Self>, client: &Arc<dyn MessagingClient>, tenant_id: &str, number: &str) {
        let (tx, mut rx) = mpsc::unbounded_channel::<(ClientEvent, Option<Vec<u8>>)>();
        let source: Weak<dyn MessagingClient> = Arc::downgrade(client);

        client.subscribe_events(Arc::new(move |event: ClientEvent| {
            let session = match event {
                ClientEvent::Connected => source.upgrade().and_then(|c| c.export_session()),
                _ => None,
            };
            if tx.send((event, session)).is_err() {
                debug!("Event consumer gone, dropping client event");
            }
        }));

        let bridge: Weak<Self> = Arc::downgrade(self);
        let tenant_id = tenant_id.to_string();
        let number = number.to_string();
        tokio::spawn(async move {
            while let Some((event, session)) = rx.recv().await {
                let Some(bridge) = bridge.upgrade() else {
                    break;
                };
                if let Err(e) = bridge.handle_event(&tenant_id, &number, event, session).await {
                    warn!(number = %number, error = %e, "Failed to persist client event");
                }
            }
        });
    }

    /// Disconnect and drop the cached client for a device.
    pub async fn release(&self, tenant_id: &str, number: &str) {
        if let Some((_, client)) = self.clients.remove(&client_key(tenant_id, number)) {
            client.disconnect().await;
        }
    }

    /// Disconnect every cached client.
    pub async fn release_all(&self) {
        let keys: Vec<String> = self.clients.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, client)) = self.clients.remove(&key) {
                client.disconnect().await;
            }
        }
    }

    /// Persist a send outcome.
    pub async fn record_outcome(
        &self,
        tenant_id: &str,
        device_number: &str,
        text: &str,
        outcome: &SendOutcome,
    ) -> Result<()> {
        self.store
            .record_message(&MessageRecord {
                id: None,
                tenant_id: tenant_id.to_string(),
                device_number: device_number.to_string(),
                recipient: outcome.recipient.clone(),
                body: text.to_string(),
                status: outcome.status.as_str().to_string(),
                error: outcome.error.clone(),
                message_id: outcome.message_id.clone(),
                created_at: Utc::now(),
            })
            .await?;
        Ok(())
    }
}
