// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bulk dispatch engine.
//!
//! Sends one text to up to [`MAX_RECIPIENTS`] recipients through a single
//! device session using a fixed pool of workers. Every send outcome is
//! persisted through the session bridge.
//!
//! # Pacing
//!
//! - The producer pauses `batch_delay` after every `workers` enqueued tasks.
//! - Each worker pauses `send_delay` after every send.
//!
//! # Aggregation
//!
//! The dispatch succeeds if at least [`MIN_SUCCESSES_FOR_OK`] sends went
//! through. Otherwise the first error observed is returned, so an expired
//! session surfaces as [`Error::TransportExpired`].
//!
//! # Cancellation
//!
//! When the token fires the producer stops enqueuing and workers stop taking
//! new tasks. Sends already in progress finish and are recorded. The engine
//! never returns before its workers have exited.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ConfigError, env_millis, env_parse};
use crate::error::{Error, Result};
use crate::messaging::{MessagingClient, MessagingError};
use crate::session::{SendOutcome, SessionBridge};
use crate::store::SendStatus;

/// Largest recipient list accepted by one dispatch.
pub const MAX_RECIPIENTS: usize = 100;

/// Successful sends needed for a dispatch to report success.
pub const MIN_SUCCESSES_FOR_OK: usize = 1;

/// Message recorded and returned when the device session has expired.
pub const DEVICE_EXPIRED_MESSAGE: &str = "device session expired, re-authenticate the device";

/// Transport error fragments that mean the device session is gone.
const TRANSPORT_EXPIRED_SIGNATURES: &[&str] = &[
    "socket closed",
    "websocket not connected",
    "not connected",
    "connection closed",
    "usync",
    "device list",
    "logged out",
];

/// Dispatch configuration
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Concurrent workers per dispatch
    pub workers: usize,
    /// Producer pause after each batch of `workers` tasks
    pub batch_delay: Duration,
    /// Worker pause after each send
    pub send_delay: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            batch_delay: Duration::from_millis(1000),
            send_delay: Duration::from_millis(200),
        }
    }
}

impl DispatchConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        let defaults = Self::default();
        let workers = env_parse("ZAPGATE_DISPATCH_WORKERS", defaults.workers)?;
        if workers == 0 {
            return Err(ConfigError::InvalidValue {
                var: "ZAPGATE_DISPATCH_WORKERS",
                value: "0".to_string(),
            });
        }
        Ok(Self {
            workers,
            batch_delay: env_millis("ZAPGATE_DISPATCH_BATCH_DELAY_MS", defaults.batch_delay)?,
            send_delay: env_millis("ZAPGATE_DISPATCH_SEND_DELAY_MS", defaults.send_delay)?,
        })
    }

    /// No pacing. For tests.
    pub fn unpaced(workers: usize) -> Self {
        Self {
            workers,
            batch_delay: Duration::ZERO,
            send_delay: Duration::ZERO,
        }
    }
}

/// Counts of a finished dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    /// Recipients in the request.
    pub requested: usize,
    /// Delivered.
    pub sent: usize,
    /// Failed for other reasons.
    pub failed: usize,
    /// Failed because the session expired.
    pub expired: usize,
    /// Never attempted because of cancellation.
    pub skipped: usize,
}

/// Classify a transport error.
pub fn classify(err: &MessagingError) -> SendStatus {
    let message = err.message.to_ascii_lowercase();
    if TRANSPORT_EXPIRED_SIGNATURES
        .iter()
        .any(|signature| message.contains(signature))
    {
        SendStatus::DeviceExpired
    } else {
        SendStatus::Failed
    }
}

/// One recipient to send to.
#[derive(Debug, Clone)]
struct SendTask {
    recipient: String,
}

/// Everything a worker needs, shared across the pool.
struct WorkerContext {
    tenant_id: String,
    device: String,
    text: String,
    client: Arc<dyn MessagingClient>,
    bridge: Arc<SessionBridge>,
    send_delay: Duration,
    cancel: CancellationToken,
}

impl WorkerContext {
    async fn persist(&self, outcome: &SendOutcome) {
        if let Err(e) = self
            .bridge
            .record_outcome(&self.tenant_id, &self.device, &self.text, outcome)
            .await
        {
            warn!(
                device = %self.device,
                recipient = %outcome.recipient,
                error = %e,
                "Failed to record send outcome"
            );
        }
    }

    async fn send(&self, task: SendTask) -> SendOutcome {
        match self.client.send_text(&task.recipient, &self.text).await {
            Ok(receipt) => SendOutcome {
                recipient: task.recipient,
                status: SendStatus::Sent,
                error: None,
                message_id: receipt.message_id,
            },
            Err(e) => {
                let status = classify(&e);
                let error = match status {
                    SendStatus::DeviceExpired => DEVICE_EXPIRED_MESSAGE.to_string(),
                    _ => e.message,
                };
                SendOutcome {
                    recipient: task.recipient,
                    status,
                    error: Some(error),
                    message_id: None,
                }
            }
        }
    }
}

async fn run_worker(
    worker_id: usize,
    ctx: Arc<WorkerContext>,
    tasks: Arc<Mutex<mpsc::Receiver<SendTask>>>,
    outcomes: mpsc::UnboundedSender<SendOutcome>,
) {
    loop {
        if ctx.cancel.is_cancelled() {
            debug!(worker_id, "Worker stopping on cancellation");
            break;
        }

        let task = {
            let mut rx = tasks.lock().await;
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => None,
                task = rx.recv() => task,
            }
        };
        let Some(task) = task else {
            break;
        };

        let outcome = ctx.send(task).await;
        ctx.persist(&outcome).await;
        if outcomes.send(outcome).is_err() {
            break;
        }

        if !ctx.send_delay.is_zero() {
            tokio::select! {
                _ = ctx.cancel.cancelled() => {}
                _ = tokio::time::sleep(ctx.send_delay) => {}
            }
        }
    }
}

/// Bulk sender over a device's messaging session.
pub struct BulkDispatcher {
    bridge: Arc<SessionBridge>,
    config: DispatchConfig,
}

impl BulkDispatcher {
    /// Create a dispatcher.
    pub fn new(bridge: Arc<SessionBridge>, config: DispatchConfig) -> Self {
        Self { bridge, config }
    }

    /// Dispatch configuration.
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Send `text` from `device` to every recipient.
    #[instrument(skip(self, recipients, text, cancel), fields(recipients = recipients.len()))]
    pub async fn send_many(
        &self,
        tenant_id: &str,
        device: &str,
        recipients: &[String],
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<DispatchSummary> {
        if device.trim().is_empty() {
            return Err(Error::Validation("device number is required".to_string()));
        }
        if recipients.is_empty() {
            return Err(Error::Validation("numbers must not be empty".to_string()));
        }
        if recipients.len() > MAX_RECIPIENTS {
            return Err(Error::Validation(format!(
                "at most {} numbers per request, got {}",
                MAX_RECIPIENTS,
                recipients.len()
            )));
        }
        if text.is_empty() {
            return Err(Error::Validation("message is required".to_string()));
        }

        let client = self.bridge.client_for(tenant_id, device).await?;

        if !client.is_connected() {
            warn!(device = %device, "Device session not connected, marking all recipients expired");
            for recipient in recipients {
                let outcome = SendOutcome {
                    recipient: recipient.clone(),
                    status: SendStatus::DeviceExpired,
                    error: Some(DEVICE_EXPIRED_MESSAGE.to_string()),
                    message_id: None,
                };
                if let Err(e) = self
                    .bridge
                    .record_outcome(tenant_id, device, text, &outcome)
                    .await
                {
                    warn!(recipient = %recipient, error = %e, "Failed to record send outcome");
                }
            }
            return Err(Error::TransportExpired {
                device: device.to_string(),
                message: DEVICE_EXPIRED_MESSAGE.to_string(),
            });
        }

        let workers = self.config.workers.max(1);
        let ctx = Arc::new(WorkerContext {
            tenant_id: tenant_id.to_string(),
            device: device.to_string(),
            text: text.to_string(),
            client,
            bridge: self.bridge.clone(),
            send_delay: self.config.send_delay,
            cancel: cancel.clone(),
        });

        let (task_tx, task_rx) = mpsc::channel::<SendTask>(recipients.len());
        let task_rx = Arc::new(Mutex::new(task_rx));
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel::<SendOutcome>();

        let mut pool = JoinSet::new();
        for worker_id in 0..workers {
            pool.spawn(run_worker(
                worker_id,
                ctx.clone(),
                task_rx.clone(),
                outcome_tx.clone(),
            ));
        }
        drop(outcome_tx);

        let mut enqueued = 0;
        for recipient in recipients {
            if cancel.is_cancelled() {
                break;
            }
            if task_tx
                .send(SendTask {
                    recipient: recipient.clone(),
                })
                .await
                .is_err()
            {
                break;
            }
            enqueued += 1;

            if enqueued % workers == 0
                && enqueued < recipients.len()
                && !self.config.batch_delay.is_zero()
            {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.batch_delay) => {}
                }
            }
        }
        drop(task_tx);

        let mut summary = DispatchSummary {
            requested: recipients.len(),
            ..Default::default()
        };
        let mut first_error: Option<Error> = None;

        while let Some(outcome) = outcome_rx.recv().await {
            match outcome.status {
                SendStatus::Sent => summary.sent += 1,
                SendStatus::Failed => summary.failed += 1,
                SendStatus::DeviceExpired => summary.expired += 1,
            }
            if first_error.is_none() && outcome.status != SendStatus::Sent {
                let message = outcome.error.unwrap_or_default();
                first_error = Some(match outcome.status {
                    SendStatus::DeviceExpired => Error::TransportExpired {
                        device: device.to_string(),
                        message,
                    },
                    _ => Error::SendFailure {
                        recipient: outcome.recipient,
                        message,
                    },
                });
            }
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Dispatch worker panicked");
            }
        }

        summary.skipped = summary.requested - summary.sent - summary.failed - summary.expired;

        info!(
            device = %device,
            sent = summary.sent,
            failed = summary.failed,
            expired = summary.expired,
            skipped = summary.skipped,
            "Bulk dispatch finished"
        );

        if summary.sent >= MIN_SUCCESSES_FOR_OK {
            return Ok(summary);
        }
        Err(first_error.unwrap_or(Error::Cancelled))
    }
}
