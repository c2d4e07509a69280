// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock container runtime for testing.
//!
//! Keeps containers in memory and records every call so tests can assert
//! how many containers were created, started, stopped and removed.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::traits::*;

#[derive(Debug, Clone)]
struct MockContainer {
    name: String,
    labels: BTreeMap<String, String>,
    running: bool,
    host_port: Option<u16>,
}

#[derive(Debug, Default)]
struct MockCalls {
    created: Vec<String>,
    started: Vec<String>,
    stopped: Vec<String>,
    removed: Vec<String>,
    lookups: usize,
}

/// In-memory container runtime.
pub struct MockRuntime {
    containers: Mutex<HashMap<String, MockContainer>>,
    calls: Mutex<MockCalls>,
    next_id: AtomicU64,
    next_port: AtomicUsize,
    /// Host port given to every created container instead of a fresh one.
    fixed_port: Option<u16>,
    pull_error: Option<String>,
    create_error: Option<String>,
    stop_error: Option<String>,
    remove_error: Option<String>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    /// Create a new mock runtime.
    pub fn new() -> Self {
        Self {
            containers: Mutex::new(HashMap::new()),
            calls: Mutex::new(MockCalls::default()),
            next_id: AtomicU64::new(1),
            next_port: AtomicUsize::new(40000),
            fixed_port: None,
            pull_error: None,
            create_error: None,
            stop_error: None,
            remove_error: None,
        }
    }

    /// Create a mock runtime whose containers all publish `port`.
    /// Point this at a wiremock server to stand in for the device runtime.
    pub fn with_port(port: u16) -> Self {
        Self {
            fixed_port: Some(port),
            ..Self::new()
        }
    }

    /// Make `ensure_image` fail with `message`.
    pub fn with_pull_error(mut self, message: &str) -> Self {
        self.pull_error = Some(message.to_string());
        self
    }

    /// Make `create_and_start` fail with `message`.
    pub fn with_create_error(mut self, message: &str) -> Self {
        self.create_error = Some(message.to_string());
        self
    }

    /// Make `stop` fail with `message`.
    pub fn with_stop_error(mut self, message: &str) -> Self {
        self.stop_error = Some(message.to_string());
        self
    }

    /// Make `remove` fail with `stderr`.
    pub fn with_remove_error(mut self, stderr: &str) -> Self {
        self.remove_error = Some(stderr.to_string());
        self
    }

    /// Add an existing container labelled with the device identity.
    /// Returns its ID.
    pub async fn seed_container(&self, identity: &str, running: bool, host_port: u16) -> String {
        let id = self.fresh_id();
        let mut labels = BTreeMap::new();
        labels.insert(DEVICE_LABEL.to_string(), identity.to_string());
        labels.insert(APP_LABEL.to_string(), APP_LABEL_VALUE.to_string());
        self.containers.lock().await.insert(
            id.clone(),
            MockContainer {
                name: format!("seeded-{}", identity),
                labels,
                running,
                host_port: Some(host_port),
            },
        );
        id
    }

    /// Whether the container still exists.
    pub async fn exists(&self, container_id: &str) -> bool {
        self.containers.lock().await.contains_key(container_id)
    }

    /// Whether the container exists and is running.
    pub async fn is_running(&self, container_id: &str) -> bool {
        self.containers
            .lock()
            .await
            .get(container_id)
            .is_some_and(|c| c.running)
    }

    /// Number of containers currently known.
    pub async fn container_count(&self) -> usize {
        self.containers.lock().await.len()
    }

    /// IDs of containers created through `create_and_start`.
    pub async fn created(&self) -> Vec<String> {
        self.calls.lock().await.created.clone()
    }

    /// IDs passed to `start`.
    pub async fn started(&self) -> Vec<String> {
        self.calls.lock().await.started.clone()
    }

    /// IDs passed to `stop`.
    pub async fn stopped(&self) -> Vec<String> {
        self.calls.lock().await.stopped.clone()
    }

    /// IDs passed to `remove`.
    pub async fn removed(&self) -> Vec<String> {
        self.calls.lock().await.removed.clone()
    }

    /// Number of label lookups performed.
    pub async fn lookups(&self) -> usize {
        self.calls.lock().await.lookups
    }

    fn fresh_id(&self) -> String {
        format!("mock-{:04}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    fn runtime_type(&self) -> &'static str {
        "mock"
    }

    fn host_address(&self) -> String {
        "127.0.0.1".to_string()
    }

    async fn allocate_port(&self) -> Result<u16> {
        if let Some(port) = self.fixed_port {
            return Ok(port);
        }
        Ok(self.next_port.fetch_add(1, Ordering::SeqCst) as u16)
    }

    async fn ensure_image(&self, _image: &str) -> Result<()> {
        match &self.pull_error {
            Some(msg) => Err(RuntimeError::Other(msg.clone())),
            None => Ok(()),
        }
    }

    async fn find_by_label(&self, key: &str, value: &str) -> Result<Option<ContainerSummary>> {
        self.calls.lock().await.lookups += 1;
        let containers = self.containers.lock().await;
        let mut matches: Vec<ContainerSummary> = containers
            .iter()
            .filter(|(_, c)| c.labels.get(key).is_some_and(|v| v == value))
            .map(|(id, c)| ContainerSummary {
                id: id.clone(),
                name: c.name.clone(),
                running: c.running,
            })
            .collect();
        matches.sort_by_key(|s| !s.running);
        Ok(matches.into_iter().next())
    }

    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String> {
        if let Some(msg) = &self.create_error {
            return Err(RuntimeError::CommandFailed {
                command: "run".to_string(),
                stderr: msg.clone(),
            });
        }

        let id = self.fresh_id();
        self.containers.lock().await.insert(
            id.clone(),
            MockContainer {
                name: spec.name.clone(),
                labels: spec.labels.clone(),
                running: true,
                host_port: Some(spec.host_port),
            },
        );
        self.calls.lock().await.created.push(id.clone());
        Ok(id)
    }

    async fn start(&self, container_id: &str) -> Result<()> {
        let mut containers = self.containers.lock().await;
        let container = containers
            .get_mut(container_id)
            .ok_or_else(|| RuntimeError::ContainerNotFound(container_id.to_string()))?;
        container.running = true;
        self.calls.lock().await.started.push(container_id.to_string());
        Ok(())
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerInspect> {
        let containers = self.containers.lock().await;
        let container = containers
            .get(container_id)
            .ok_or_else(|| RuntimeError::ContainerNotFound(container_id.to_string()))?;
        Ok(ContainerInspect {
            id: container_id.to_string(),
            running: container.running,
            host_port: container.host_port,
        })
    }

    async fn stop(&self, container_id: &str) -> Result<()> {
        self.calls.lock().await.stopped.push(container_id.to_string());
        if let Some(msg) = &self.stop_error {
            return Err(RuntimeError::Other(msg.clone()));
        }
        if let Some(container) = self.containers.lock().await.get_mut(container_id) {
            container.running = false;
        }
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        self.calls.lock().await.removed.push(container_id.to_string());
        if let Some(msg) = &self.remove_error {
            return Err(RuntimeError::CommandFailed {
                command: "rm".to_string(),
                stderr: msg.clone(),
            });
        }
        if self.containers.lock().await.remove(container_id).is_none() {
            return Err(RuntimeError::CommandFailed {
                command: "rm".to_string(),
                stderr: format!("Error response from daemon: No such container: {}", container_id),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_find_by_label_prefers_running() {
        let runtime = MockRuntime::new();
        runtime.seed_container("5511", false, 40001).await;
        let running = runtime.seed_container("5511", true, 40002).await;

        let found = runtime
            .find_by_label(DEVICE_LABEL, "5511")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, running);
        assert!(found.running);
    }

    #[tokio::test]
    async fn test_remove_unknown_reports_no_such_container() {
        let runtime = MockRuntime::new();
        let err = runtime.remove("missing").await.unwrap_err();
        assert!(err.is_idempotent_teardown());
    }

    #[tokio::test]
    async fn test_fixed_port() {
        let runtime = MockRuntime::with_port(5555);
        assert_eq!(runtime.allocate_port().await.unwrap(), 5555);
        assert_eq!(runtime.allocate_port().await.unwrap(), 5555);
    }
}
