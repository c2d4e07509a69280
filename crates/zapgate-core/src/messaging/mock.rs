// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock messaging client for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{
    ClientContext, ClientEvent, EventHandler, EventHandlers, MessagingClient,
    MessagingClientFactory, MessagingError, SendReceipt,
};

fn locked<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Scriptable in-memory messaging client.
///
/// Tracks every send and the peak number of concurrent sends.
pub struct MockMessagingClient {
    connected: AtomicBool,
    /// Whether `connect()` succeeds.
    connect_ok: AtomicBool,
    failures: Mutex<HashMap<String, String>>,
    fail_all: Mutex<Option<String>>,
    sent: Mutex<Vec<(String, String)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    send_delay: Duration,
    session: Mutex<Option<Vec<u8>>>,
    handlers: EventHandlers,
}

impl Default for MockMessagingClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMessagingClient {
    /// A client that connects and sends successfully.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            connect_ok: AtomicBool::new(true),
            failures: Mutex::new(HashMap::new()),
            fail_all: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            send_delay: Duration::ZERO,
            session: Mutex::new(None),
            handlers: EventHandlers::default(),
        }
    }

    /// A client whose `connect()` always fails.
    pub fn unreachable() -> Self {
        let client = Self::new();
        client.connect_ok.store(false, Ordering::SeqCst);
        client
    }

    /// Make every send take `delay`.
    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    /// Session blob returned by `export_session`.
    pub fn with_session(self, blob: Vec<u8>) -> Self {
        *locked(&self.session) = Some(blob);
        self
    }

    /// Fail sends to `recipient` with `message`.
    pub fn fail_recipient(&self, recipient: &str, message: &str) {
        locked(&self.failures).insert(recipient.to_string(), message.to_string());
    }

    /// Fail every send with `message`.
    pub fn fail_all(&self, message: &str) {
        *locked(&self.fail_all) = Some(message.to_string());
    }

    /// `(recipient, text)` of every successful send.
    pub fn sent(&self) -> Vec<(String, String)> {
        locked(&self.sent).clone()
    }

    /// Highest number of sends observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Sends currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Push an event to subscribers, updating the connected flag.
    pub fn emit(&self, event: ClientEvent) {
        match &event {
            ClientEvent::Connected => self.connected.store(true, Ordering::SeqCst),
            ClientEvent::Disconnected { .. } => self.connected.store(false, Ordering::SeqCst),
            ClientEvent::Other(_) => {}
        }
        self.handlers.emit(event);
    }
}

#[async_trait]
impl MessagingClient for MockMessagingClient {
    async fn connect(&self) -> Result<(), MessagingError> {
        if !self.connect_ok.load(Ordering::SeqCst) {
            return Err(MessagingError::new("websocket not connected"));
        }
        if !self.connected.load(Ordering::SeqCst) {
            self.emit(ClientEvent::Connected);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send_text(&self, recipient: &str, text: &str) -> Result<SendReceipt, MessagingError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.send_delay.is_zero() {
            tokio::time::sleep(self.send_delay).await;
        }

        let failure = locked(&self.failures)
            .get(recipient)
            .cloned()
            .or_else(|| locked(&self.fail_all).clone());

        let result = match failure {
            Some(message) => Err(MessagingError::new(message)),
            None => {
                let mut sent = locked(&self.sent);
                sent.push((recipient.to_string(), text.to_string()));
                Ok(SendReceipt {
                    message_id: Some(format!("mock-msg-{}", sent.len())),
                })
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn subscribe_events(&self, handler: EventHandler) {
        self.handlers.add(handler);
    }

    async fn disconnect(&self) {
        if self.connected.load(Ordering::SeqCst) {
            self.emit(ClientEvent::Disconnected {
                reason: Some("client released".to_string()),
            });
        }
    }

    fn export_session(&self) -> Option<Vec<u8>> {
        locked(&self.session).clone()
    }
}

/// Factory handing out one shared mock client.
pub struct MockClientFactory {
    client: Arc<MockMessagingClient>,
    opened: AtomicUsize,
}

impl MockClientFactory {
    /// Wrap a mock client.
    pub fn new(client: Arc<MockMessagingClient>) -> Self {
        Self {
            client,
            opened: AtomicUsize::new(0),
        }
    }

    /// The shared client.
    pub fn client(&self) -> &Arc<MockMessagingClient> {
        &self.client
    }

    /// Number of `open` calls.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagingClientFactory for MockClientFactory {
    async fn open(&self, _ctx: &ClientContext) -> crate::Result<Arc<dyn MessagingClient>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(self.client.clone())
    }
}
