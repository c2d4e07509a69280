// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Messaging client backed by a device runtime's HTTP API.
//!
//! The device runtime owns the actual messaging session. This client checks
//! `GET /health` to decide whether it is connected and sends through
//! `POST /send`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    ClientContext, ClientEvent, EventHandler, EventHandlers, MessagingClient,
    MessagingClientFactory, MessagingError, SendReceipt,
};
use crate::error::Error;
use crate::lifecycle::DeviceLifecycle;
use crate::registry::ContainerDescriptor;

/// Text the runtime sends back when its session is not connected.
const NOT_CONNECTED: &str = "websocket not connected";

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    number: &'a str,
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    id: Option<String>,
}

/// Client talking to one device runtime.
pub struct RuntimeMessagingClient {
    http: reqwest::Client,
    device: ContainerDescriptor,
    timeout: Duration,
    connected: AtomicBool,
    handlers: EventHandlers,
}

impl RuntimeMessagingClient {
    /// Create a client for a device runtime.
    pub fn new(http: reqwest::Client, device: ContainerDescriptor) -> Self {
        Self {
            http,
            device,
            timeout: Duration::from_secs(30),
            connected: AtomicBool::new(false),
            handlers: EventHandlers::default(),
        }
    }

    /// Device runtime this client targets.
    pub fn device(&self) -> &ContainerDescriptor {
        &self.device
    }

    fn mark_disconnected(&self, reason: String) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.handlers.emit(ClientEvent::Disconnected {
                reason: Some(reason),
            });
        }
    }
}

#[async_trait]
impl MessagingClient for RuntimeMessagingClient {
    async fn connect(&self) -> Result<(), MessagingError> {
        let resp = self
            .http
            .get(self.device.url_for("/health"))
            .timeout(self.timeout)
            .send()
            .await;

        match resp {
            Ok(resp) if resp.status().is_success() => {
                if !self.connected.swap(true, Ordering::SeqCst) {
                    self.handlers.emit(ClientEvent::Connected);
                }
                Ok(())
            }
            Ok(resp) => {
                let reason = format!("{}: health returned {}", NOT_CONNECTED, resp.status());
                self.mark_disconnected(reason.clone());
                Err(MessagingError::new(reason))
            }
            Err(e) => {
                let reason = format!("{}: {}", NOT_CONNECTED, e);
                self.mark_disconnected(reason.clone());
                Err(MessagingError::new(reason))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send_text(&self, recipient: &str, text: &str) -> Result<SendReceipt, MessagingError> {
        let resp = self
            .http
            .post(self.device.url_for("/send"))
            .timeout(self.timeout)
            .json(&SendRequest {
                number: recipient,
                message: text,
            })
            .send()
            .await
            .map_err(|e| MessagingError::new(format!("send request failed: {}", e)))?;

        let status = resp.status();
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            self.mark_disconnected(NOT_CONNECTED.to_string());
            return Err(MessagingError::new(NOT_CONNECTED));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MessagingError::new(format!(
                "runtime returned {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        let receipt = match resp.json::<SendResponse>().await {
            Ok(body) => SendReceipt {
                message_id: body.id,
            },
            Err(e) => {
                debug!(error = %e, "Send response had no readable body");
                SendReceipt::default()
            }
        };
        Ok(receipt)
    }

    fn subscribe_events(&self, handler: EventHandler) {
        self.handlers.add(handler);
    }

    async fn disconnect(&self) {
        self.mark_disconnected("client released".to_string());
    }
}

/// Opens runtime-backed clients for devices that already have a container.
/// A device with no container is [`Error::NotFound`].
pub struct RuntimeClientFactory {
    lifecycle: Arc<DeviceLifecycle>,
    http: reqwest::Client,
}

impl RuntimeClientFactory {
    /// Create a factory.
    pub fn new(lifecycle: Arc<DeviceLifecycle>, http: reqwest::Client) -> Self {
        Self { lifecycle, http }
    }
}

#[async_trait]
impl MessagingClientFactory for RuntimeClientFactory {
    async fn open(&self, ctx: &ClientContext) -> crate::Result<Arc<dyn MessagingClient>> {
        let device = self
            .lifecycle
            .resolve(&ctx.number)
            .await?
            .ok_or_else(|| Error::NotFound(ctx.number.clone()))?;
        if ctx.session.is_some() {
            debug!(number = %ctx.number, "Device runtime keeps its own session state");
        }
        Ok(Arc::new(RuntimeMessagingClient::new(self.http.clone(), device)))
    }
}
