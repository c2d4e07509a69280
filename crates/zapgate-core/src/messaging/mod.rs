// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Messaging client capability.
//!
//! The dispatch engine and the session bridge only see [`MessagingClient`].
//! Implementations must accept concurrent `send_text` calls on one instance.

mod mock;
mod runtime_client;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;

pub use mock::{MockClientFactory, MockMessagingClient};
pub use runtime_client::{RuntimeClientFactory, RuntimeMessagingClient};

/// Lifecycle events emitted by a messaging client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Session is connected and can send.
    Connected,
    /// Session dropped.
    Disconnected {
        /// Reason reported by the transport, if any.
        reason: Option<String>,
    },
    /// Any other event, passed through for logging.
    Other(String),
}

/// Callback receiving client events.
pub type EventHandler = Arc<dyn Fn(ClientEvent) + Send + Sync>;

/// Error returned by a messaging transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct MessagingError {
    /// Transport error text.
    pub message: String,
}

impl MessagingError {
    /// Create an error from any message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Acknowledgement of a sent message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReceipt {
    /// Transport message ID, when the transport returns one.
    pub message_id: Option<String>,
}

/// A connected messaging session for one device.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Establish the session.
    async fn connect(&self) -> Result<(), MessagingError>;

    /// Whether the session can currently send.
    fn is_connected(&self) -> bool;

    /// Send a text message.
    async fn send_text(&self, recipient: &str, text: &str) -> Result<SendReceipt, MessagingError>;

    /// Register a callback for lifecycle events.
    fn subscribe_events(&self, handler: EventHandler);

    /// Close the session.
    async fn disconnect(&self);

    /// Opaque session state to persist, if the transport exposes it.
    fn export_session(&self) -> Option<Vec<u8>> {
        None
    }
}

/// What a factory needs to open a client.
#[derive(Debug, Clone)]
pub struct ClientContext {
    /// Owning tenant.
    pub tenant_id: String,
    /// Device identity.
    pub number: String,
    /// Persisted session blob, if any.
    pub session: Option<Vec<u8>>,
}

/// Opens messaging clients for devices.
#[async_trait]
pub trait MessagingClientFactory: Send + Sync {
    /// Open a client for a device. The client is not yet connected.
    async fn open(&self, ctx: &ClientContext) -> crate::Result<Arc<dyn MessagingClient>>;
}

/// Subscriber list shared by client implementations.
#[derive(Default)]
pub struct EventHandlers {
    handlers: Mutex<Vec<EventHandler>>,
}

impl EventHandlers {
    /// Add a subscriber.
    pub fn add(&self, handler: EventHandler) {
        self.handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handler);
    }

    /// Deliver an event to every subscriber.
    pub fn emit(&self, event: ClientEvent) {
        let handlers = self
            .handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for handler in handlers {
            handler(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_event_handlers_fan_out() {
        let handlers = EventHandlers::default();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = count.clone();
            handlers.add(Arc::new(move |event| {
                assert_eq!(event, ClientEvent::Connected);
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        handlers.emit(ClientEvent::Connected);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
