// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Device lifecycle manager.
//!
//! Creates, reuses and tears down the container backing a device. At most one
//! running container exists per identity: every operation below runs under
//! the identity's registry guard.
//!
//! # Create-or-reuse
//!
//! 1. Registry hit: return it.
//! 2. Labelled container found in the runtime: start it if stopped, register
//!    it and return. Adopted containers skip the health gate and are never
//!    rolled back.
//! 3. Otherwise: ensure image, allocate port, create and start.
//! 4. Health gate on the new container. On timeout it is stopped and removed.
//! 5. Register and return.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ConfigError, env_millis, env_opt, env_secs};
use crate::error::{Error, ProvisioningStage, Result};
use crate::health::{HealthOutcome, HealthProbe};
use crate::registry::{ContainerDescriptor, DeviceRegistry};
use crate::runtime::{
    APP_LABEL, APP_LABEL_VALUE, ContainerRuntime, ContainerSpec, ContainerSummary, DEVICE_ENV,
    DEVICE_LABEL,
};

/// Lifecycle configuration
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Device runtime image
    pub image: String,
    /// Container name prefix
    pub name_prefix: String,
    /// Health gate deadline
    pub health_timeout: Duration,
    /// Delay between health probes
    pub health_interval: Duration,
    /// Extra environment passed to every device container
    pub extra_env: BTreeMap<String, String>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        let mut extra_env = BTreeMap::new();
        extra_env.insert("LOG_LEVEL".to_string(), "info".to_string());
        Self {
            image: "zap-client:latest".to_string(),
            name_prefix: "whats-device".to_string(),
            health_timeout: Duration::from_secs(15),
            health_interval: Duration::from_millis(300),
            extra_env,
        }
    }
}

impl LifecycleConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            image: env_opt("ZAPGATE_CLIENT_IMAGE").unwrap_or(defaults.image),
            name_prefix: env_opt("ZAPGATE_CONTAINER_PREFIX").unwrap_or(defaults.name_prefix),
            health_timeout: env_secs("ZAPGATE_HEALTH_TIMEOUT_SECS", defaults.health_timeout)?,
            health_interval: env_millis("ZAPGATE_HEALTH_INTERVAL_MS", defaults.health_interval)?,
            extra_env: defaults.extra_env,
        })
    }

    /// Tag of the configured image, `latest` when untagged.
    pub fn image_version(&self) -> &str {
        image_tag(&self.image)
    }
}

/// Tag part of an image reference. A colon inside the registry host
/// (`host:5000/img`) is not a tag.
pub fn image_tag(image: &str) -> &str {
    let name = image.split('@').next().unwrap_or(image);
    match name.rsplit_once(':') {
        Some((_, tag)) if !tag.contains('/') => tag,
        _ => "latest",
    }
}

/// Outcome of a teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    /// A container was stopped and removed.
    Removed {
        /// Container that served the device.
        container_id: String,
    },
    /// The device was already torn down earlier.
    AlreadyRemoved,
}

/// Creates, reuses and tears down device containers.
pub struct DeviceLifecycle {
    registry: Arc<DeviceRegistry>,
    runtime: Arc<dyn ContainerRuntime>,
    health: HealthProbe,
    config: LifecycleConfig,
    /// Identities torn down since their last create.
    tombstones: DashSet<String>,
}

impl DeviceLifecycle {
    /// Create a lifecycle manager.
    pub fn new(
        registry: Arc<DeviceRegistry>,
        runtime: Arc<dyn ContainerRuntime>,
        http: reqwest::Client,
        config: LifecycleConfig,
    ) -> Self {
        let health = HealthProbe::new(http, config.health_interval, config.health_timeout);
        Self {
            registry,
            runtime,
            health,
            config,
            tombstones: DashSet::new(),
        }
    }

    /// The registry this manager keeps up to date.
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Lifecycle configuration.
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Resolve a device's running container without creating one.
    pub async fn resolve(&self, identity: &str) -> Result<Option<ContainerDescriptor>> {
        self.registry.resolve(identity).await
    }

    /// Return the running, healthy container for `identity`, creating or
    /// restarting one if needed.
    #[instrument(skip_all, fields(identity = %identity))]
    pub async fn create_or_reuse(&self, identity: &str) -> Result<ContainerDescriptor> {
        if identity.trim().is_empty() {
            return Err(Error::Validation("device number is required".to_string()));
        }

        if let Some(descriptor) = self.registry.cached(identity) {
            return Ok(descriptor);
        }

        let _guard = self.registry.lock(identity).await;
        if let Some(descriptor) = self.registry.cached(identity) {
            return Ok(descriptor);
        }

        let existing = self
            .runtime
            .find_by_label(DEVICE_LABEL, identity)
            .await
            .map_err(|e| Error::provisioning(ProvisioningStage::Discovery, e))?;

        if let Some(summary) = existing {
            let descriptor = self.adopt(summary).await?;
            self.registry.put(identity, descriptor.clone());
            self.tombstones.remove(identity);
            info!(
                container_id = %descriptor.id,
                endpoint = %descriptor.base_url(),
                "Adopted existing device container"
            );
            return Ok(descriptor);
        }

        let (container_id, port) = self.create_container(identity).await?;
        let descriptor = ContainerDescriptor::new(container_id, self.runtime.host_address(), port)?;

        match self.health.wait_until_healthy(descriptor.base_url()).await {
            HealthOutcome::Healthy { attempts } => {
                debug!(container_id = %descriptor.id, attempts, "Device runtime healthy");
            }
            HealthOutcome::TimedOut { attempts } => {
                error!(
                    container_id = %descriptor.id,
                    attempts,
                    "Device runtime never became healthy, rolling back"
                );
                self.rollback(&descriptor.id).await;
                return Err(Error::HealthCheckTimeout {
                    container_id: descriptor.id,
                    waited: self.health.timeout(),
                });
            }
        }

        self.registry.put(identity, descriptor.clone());
        self.tombstones.remove(identity);
        info!(
            container_id = %descriptor.id,
            endpoint = %descriptor.base_url(),
            "Device container ready"
        );
        Ok(descriptor)
    }

    /// Take over a labelled container found on the runtime, starting it if
    /// stopped. Its health is not checked here.
    async fn adopt(&self, summary: ContainerSummary) -> Result<ContainerDescriptor> {
        if !summary.running {
            info!(container_id = %summary.id, "Starting stopped device container");
            self.runtime
                .start(&summary.id)
                .await
                .map_err(|e| Error::provisioning(ProvisioningStage::ContainerStart, e))?;
        }
        let inspect = self
            .runtime
            .inspect(&summary.id)
            .await
            .map_err(|e| Error::provisioning(ProvisioningStage::Discovery, e))?;
        let port = inspect.host_port.ok_or_else(|| {
            Error::provisioning(
                ProvisioningStage::Discovery,
                format!("container {} has no published port", summary.id),
            )
        })?;
        ContainerDescriptor::new(summary.id, self.runtime.host_address(), port)
    }

    async fn create_container(&self, identity: &str) -> Result<(String, u16)> {
        self.runtime
            .ensure_image(&self.config.image)
            .await
            .map_err(|e| Error::provisioning(ProvisioningStage::ImagePull, e))?;

        let host_port = self
            .runtime
            .allocate_port()
            .await
            .map_err(|e| Error::provisioning(ProvisioningStage::PortAllocation, e))?;

        let mut env = self.config.extra_env.clone();
        env.insert(DEVICE_ENV.to_string(), identity.to_string());

        let mut labels = BTreeMap::new();
        labels.insert(APP_LABEL.to_string(), APP_LABEL_VALUE.to_string());
        labels.insert(DEVICE_LABEL.to_string(), identity.to_string());

        let spec = ContainerSpec {
            name: self.container_name(identity),
            image: self.config.image.clone(),
            host_port,
            env,
            labels,
        };

        let id = self
            .runtime
            .create_and_start(&spec)
            .await
            .map_err(|e| Error::provisioning(ProvisioningStage::ContainerStart, e))?;

        info!(container_id = %id, name = %spec.name, host_port, "Created device container");
        Ok((id, host_port))
    }

    fn container_name(&self, identity: &str) -> String {
        let sanitized: String = identity
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        format!(
            "{}-{}-{}",
            self.config.name_prefix,
            sanitized,
            chrono::Utc::now().timestamp_millis()
        )
    }

    /// Stop and remove a container that failed the health gate. Once each.
    async fn rollback(&self, container_id: &str) {
        if let Err(e) = self.runtime.stop(container_id).await {
            warn!(container_id = %container_id, error = %e, "Rollback stop failed");
        }
        if let Err(e) = self.runtime.remove(container_id).await
            && !e.is_idempotent_teardown()
        {
            warn!(container_id = %container_id, error = %e, "Rollback remove failed");
        }
    }

    /// Tear down the container serving `identity`.
    ///
    /// The registry entry is dropped before the runtime is touched. Stop
    /// failures are logged and ignored. Removal errors meaning "already gone"
    /// count as success. A second remove of the same identity returns
    /// [`Removal::AlreadyRemoved`]; an identity never seen returns
    /// [`Error::NotFound`].
    #[instrument(skip_all, fields(identity = %identity))]
    pub async fn remove(&self, identity: &str) -> Result<Removal> {
        if identity.trim().is_empty() {
            return Err(Error::Validation("device number is required".to_string()));
        }

        let _guard = self.registry.lock(identity).await;

        let container_id = match self.registry.remove(identity) {
            Some(descriptor) => Some(descriptor.id),
            None => self
                .runtime
                .find_by_label(DEVICE_LABEL, identity)
                .await?
                .map(|summary| summary.id),
        };

        let Some(container_id) = container_id else {
            if self.tombstones.contains(identity) {
                debug!("Device already removed");
                return Ok(Removal::AlreadyRemoved);
            }
            return Err(Error::NotFound(identity.to_string()));
        };

        if let Err(e) = self.runtime.stop(&container_id).await {
            warn!(container_id = %container_id, error = %e, "Failed to stop container, removing anyway");
        }

        match self.runtime.remove(&container_id).await {
            Ok(()) => {}
            Err(e) if e.is_idempotent_teardown() => {
                debug!(container_id = %container_id, error = %e, "Container already gone");
            }
            Err(e) => {
                error!(container_id = %container_id, error = %e, "Failed to remove container");
                return Err(Error::Teardown {
                    container_id,
                    message: e.to_string(),
                });
            }
        }

        self.tombstones.insert(identity.to_string());
        info!(container_id = %container_id, "Device container removed");
        Ok(Removal::Removed { container_id })
    }
}
