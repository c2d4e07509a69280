// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Device registry.
//!
//! Maps a device identity to the container currently serving it. The map is
//! authoritative while the process lives; after a restart it is rebuilt lazily
//! from container labels the first time each identity is resolved.
//!
//! Every mutation for an identity (create, reuse, teardown) runs under that
//! identity's guard, see [`DeviceRegistry::lock`]. Reads of a cached entry do
//! not take the guard.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::Result;
use crate::runtime::{ContainerRuntime, DEVICE_LABEL};

/// Where a device's runtime can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDescriptor {
    /// Container ID.
    pub id: String,
    /// Host address of the published port.
    pub host: String,
    /// Published host port.
    pub port: u16,
    /// Base URL of the device runtime.
    pub endpoint: Url,
}

impl ContainerDescriptor {
    /// Build a descriptor, deriving the endpoint from host and port.
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();
        let endpoint = Url::parse(&format!("http://{}:{}", host, port))?;
        Ok(Self {
            id: id.into(),
            host,
            port,
            endpoint,
        })
    }

    /// Endpoint without trailing slash, e.g. `http://127.0.0.1:49153`.
    pub fn base_url(&self) -> &str {
        self.endpoint.as_str().trim_end_matches('/')
    }

    /// Absolute URL for a path on the device runtime.
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url(), path)
        } else {
            format!("{}/{}", self.base_url(), path)
        }
    }
}

type GuardMap = DashMap<String, Arc<Mutex<()>>>;

/// Held mutation guard for one identity.
///
/// The identity's mutex is dropped from the registry when the last holder or
/// waiter lets go, so the guard map only grows with in-flight identities.
pub struct IdentityGuard {
    guard: Option<OwnedMutexGuard<()>>,
    identity: String,
    guards: Arc<GuardMap>,
}

impl Drop for IdentityGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Clones are taken under the shard lock, so a count of one means no
        // one else is holding or waiting.
        self.guards
            .remove_if(&self.identity, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Identity → container map with per-identity mutation guards.
pub struct DeviceRegistry {
    runtime: Arc<dyn ContainerRuntime>,
    entries: DashMap<String, ContainerDescriptor>,
    guards: Arc<GuardMap>,
}

impl DeviceRegistry {
    /// Create an empty registry backed by `runtime` for fallback lookups.
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            entries: DashMap::new(),
            guards: Arc::new(DashMap::new()),
        }
    }

    /// Acquire the mutation guard for an identity.
    pub async fn lock(&self, identity: &str) -> IdentityGuard {
        let mutex = self
            .guards
            .entry(identity.to_string())
            .or_default()
            .clone();
        IdentityGuard {
            guard: Some(mutex.lock_owned().await),
            identity: identity.to_string(),
            guards: self.guards.clone(),
        }
    }

    /// Identities with a guard currently held or awaited.
    pub fn guarded(&self) -> usize {
        self.guards.len()
    }

    /// Cached entry only, no runtime lookup.
    pub fn cached(&self, identity: &str) -> Option<ContainerDescriptor> {
        self.entries.get(identity).map(|e| e.value().clone())
    }

    /// Resolve an identity to its running container.
    ///
    /// Checks memory first. On a miss, asks the runtime once for a container
    /// labelled with the identity and adopts it only if it is running.
    pub async fn resolve(&self, identity: &str) -> Result<Option<ContainerDescriptor>> {
        if let Some(descriptor) = self.cached(identity) {
            return Ok(Some(descriptor));
        }

        let _guard = self.lock(identity).await;
        // Another task may have created or adopted it while we waited.
        if let Some(descriptor) = self.cached(identity) {
            return Ok(Some(descriptor));
        }
        self.discover(identity).await
    }

    /// Runtime fallback lookup. Caller must hold the identity guard.
    async fn discover(&self, identity: &str) -> Result<Option<ContainerDescriptor>> {
        let Some(summary) = self.runtime.find_by_label(DEVICE_LABEL, identity).await? else {
            debug!(identity = %identity, "No container labelled for device");
            return Ok(None);
        };

        if !summary.running {
            debug!(identity = %identity, container_id = %summary.id, "Labelled container is not running, not adopting");
            return Ok(None);
        }

        let inspect = self.runtime.inspect(&summary.id).await?;
        let Some(port) = inspect.host_port else {
            warn!(identity = %identity, container_id = %summary.id, "Running container has no published port");
            return Ok(None);
        };

        let descriptor = ContainerDescriptor::new(inspect.id, self.runtime.host_address(), port)?;
        info!(
            identity = %identity,
            container_id = %descriptor.id,
            endpoint = %descriptor.base_url(),
            "Adopted running container"
        );
        self.put(identity, descriptor.clone());
        Ok(Some(descriptor))
    }

    /// Record the container serving an identity.
    pub fn put(&self, identity: &str, descriptor: ContainerDescriptor) {
        self.entries.insert(identity.to_string(), descriptor);
    }

    /// Forget an identity, returning the previous entry.
    pub fn remove(&self, identity: &str) -> Option<ContainerDescriptor> {
        self.entries.remove(identity).map(|(_, d)| d)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no identity is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Identities currently cached.
    pub fn identities(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }
}
