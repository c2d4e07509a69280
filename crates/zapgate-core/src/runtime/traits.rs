// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container runtime trait definitions.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

/// Label carrying the device identity on every device container.
pub const DEVICE_LABEL: &str = "phone_number";

/// Label marking containers owned by the gateway.
pub const APP_LABEL: &str = "app";

/// Value of [`APP_LABEL`].
pub const APP_LABEL_VALUE: &str = "whatsapp-client";

/// Environment variable carrying the device identity into the container.
pub const DEVICE_ENV: &str = "PHONE_NUMBER";

/// Errors from container runtime operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RuntimeError {
    /// Container does not exist.
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    /// Runtime command exited unsuccessfully.
    #[error("`{command}` failed: {stderr}")]
    CommandFailed {
        /// Command line that was run.
        command: String,
        /// Standard error output.
        stderr: String,
    },

    /// Runtime output could not be understood.
    #[error("Unexpected runtime output: {0}")]
    MalformedOutput(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

impl RuntimeError {
    /// Whether this error means the container is already gone or already
    /// being removed. Teardown treats these as success.
    pub fn is_idempotent_teardown(&self) -> bool {
        match self {
            RuntimeError::ContainerNotFound(_) => true,
            RuntimeError::CommandFailed { stderr, .. } | RuntimeError::Other(stderr) => {
                let stderr = stderr.to_ascii_lowercase();
                stderr.contains("no such container")
                    || stderr.contains("already in progress")
            }
            _ => false,
        }
    }
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Parameters for creating a device container.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Host port bound to the container's service port.
    pub host_port: u16,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Labels.
    pub labels: BTreeMap<String, String>,
}

/// A container found by label lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    /// Container ID.
    pub id: String,
    /// Container name.
    pub name: String,
    /// Whether it is currently running.
    pub running: bool,
}

/// Inspection result for one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInspect {
    /// Container ID.
    pub id: String,
    /// Whether it is currently running.
    pub running: bool,
    /// Host port mapped to the service port, if published.
    pub host_port: Option<u16>,
}

/// Capability interface over the container engine.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Backend name for logging.
    fn runtime_type(&self) -> &'static str;

    /// Address at which published container ports are reachable.
    fn host_address(&self) -> String;

    /// Choose a free host port.
    async fn allocate_port(&self) -> Result<u16> {
        Ok(super::net::allocate_free_port()?)
    }

    /// Make sure the image is available, pulling it if needed.
    async fn ensure_image(&self, image: &str) -> Result<()>;

    /// Find a container (running or not) carrying `key=value`.
    async fn find_by_label(&self, key: &str, value: &str) -> Result<Option<ContainerSummary>>;

    /// Create and start a container. Returns its ID.
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String>;

    /// Start an existing stopped container.
    async fn start(&self, container_id: &str) -> Result<()>;

    /// Inspect a container.
    async fn inspect(&self, container_id: &str) -> Result<ContainerInspect>;

    /// Stop a container.
    async fn stop(&self, container_id: &str) -> Result<()>;

    /// Force-remove a container and its volumes.
    async fn remove(&self, container_id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotent_teardown_detection() {
        let gone = RuntimeError::CommandFailed {
            command: "docker rm".into(),
            stderr: "Error response from daemon: No such container: abc".into(),
        };
        assert!(gone.is_idempotent_teardown());

        let racing = RuntimeError::CommandFailed {
            command: "docker rm".into(),
            stderr: "removal of container abc is already in progress".into(),
        };
        assert!(racing.is_idempotent_teardown());

        assert!(RuntimeError::ContainerNotFound("abc".into()).is_idempotent_teardown());

        let other = RuntimeError::CommandFailed {
            command: "docker rm".into(),
            stderr: "permission denied".into(),
        };
        assert!(!other.is_idempotent_teardown());
    }
}
