// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for zapgate-core.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Stage of container provisioning that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningStage {
    /// Looking up an existing container by label.
    Discovery,
    /// Making the device image available locally.
    ImagePull,
    /// Choosing a free host port.
    PortAllocation,
    /// Creating or starting the container.
    ContainerStart,
}

impl fmt::Display for ProvisioningStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            ProvisioningStage::Discovery => "discovery",
            ProvisioningStage::ImagePull => "image pull",
            ProvisioningStage::PortAllocation => "port allocation",
            ProvisioningStage::ContainerStart => "container start",
        };
        f.write_str(stage)
    }
}

/// Orchestration and dispatch errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Unknown device identity.
    #[error("Device not found: {0}")]
    NotFound(String),

    /// Missing or invalid request fields.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Container could not be provisioned.
    #[error("Provisioning failed during {stage}: {message}")]
    Provisioning {
        /// Which step failed.
        stage: ProvisioningStage,
        /// Underlying failure.
        message: String,
    },

    /// Container started but never reported healthy.
    #[error("Container {container_id} did not become healthy within {waited:?}")]
    HealthCheckTimeout {
        /// Container that was rolled back.
        container_id: String,
        /// How long the gate waited.
        waited: Duration,
    },

    /// Container removal failed for a reason other than "already gone".
    #[error("Teardown of container {container_id} failed: {message}")]
    Teardown {
        /// Container being removed.
        container_id: String,
        /// Underlying failure.
        message: String,
    },

    /// Messaging session for the device is gone and must be re-authenticated.
    #[error("Device {device} expired: {message}")]
    TransportExpired {
        /// Device identity.
        device: String,
        /// Canonical expiry message.
        message: String,
    },

    /// A single send failed for a reason other than transport expiry.
    #[error("Send to {recipient} failed: {message}")]
    SendFailure {
        /// Recipient number.
        recipient: String,
        /// Underlying failure.
        message: String,
    },

    /// Listing webhooks on the device runtime failed.
    #[error("Failed to fetch existing webhooks: {0}")]
    WebhookFetch(String),

    /// Registering a webhook on the device runtime failed.
    #[error("Failed to register webhook (phrase={phrase} callback={callback_url}): {message}")]
    WebhookPush {
        /// Phrase of the rule that failed.
        phrase: String,
        /// Callback URL of the rule that failed.
        callback_url: String,
        /// Underlying failure.
        message: String,
    },

    /// Operation was cancelled before any work completed.
    #[error("Operation cancelled")]
    Cancelled,

    /// Container runtime adapter failed.
    #[error("Runtime error: {0}")]
    Runtime(#[from] crate::runtime::RuntimeError),

    /// Repository operation failed.
    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// HTTP call to a device runtime failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Device endpoint could not be built.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}

impl Error {
    /// Convenience constructor for provisioning failures.
    pub fn provisioning(stage: ProvisioningStage, message: impl fmt::Display) -> Self {
        Error::Provisioning {
            stage,
            message: message.to_string(),
        }
    }
}

/// Result type using the core Error.
pub type Result<T> = std::result::Result<T, Error>;
