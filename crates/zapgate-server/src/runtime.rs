// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for zapgate-server.
//!
//! [`GatewayRuntime`] wires the store, the container backend and the
//! messaging layer together and runs the HTTP server inside an existing
//! tokio application.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use zapgate_core::runtime::{DockerCli, DockerCliConfig};
//! use zapgate_core::store::MemoryStore;
//! use zapgate_server::runtime::GatewayRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = GatewayRuntime::builder()
//!         .store(Arc::new(MemoryStore::new()))
//!         .container_runtime(Arc::new(DockerCli::new(DockerCliConfig::default())))
//!         .bind_addr("0.0.0.0:8080".parse()?)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... run your application ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use zapgate_core::dispatch::{BulkDispatcher, DispatchConfig};
use zapgate_core::lifecycle::{DeviceLifecycle, LifecycleConfig};
use zapgate_core::messaging::{MessagingClientFactory, RuntimeClientFactory};
use zapgate_core::registry::DeviceRegistry;
use zapgate_core::runtime::ContainerRuntime;
use zapgate_core::session::SessionBridge;
use zapgate_core::store::DeviceStore;
use zapgate_core::webhook::{DeviceApi, HttpDeviceApi, WebhookReconciler};

use crate::metrics::GatewayMetrics;
use crate::server::serve;
use crate::state::AppState;

/// Builder for creating a [`GatewayRuntime`].
pub struct GatewayRuntimeBuilder {
    store: Option<Arc<dyn DeviceStore>>,
    container_runtime: Option<Arc<dyn ContainerRuntime>>,
    messaging: Option<Arc<dyn MessagingClientFactory>>,
    device_api: Option<Arc<dyn DeviceApi>>,
    http: Option<reqwest::Client>,
    bind_addr: SocketAddr,
    tenant_id: String,
    cors_origins: Vec<String>,
    max_body_bytes: usize,
    lifecycle_config: LifecycleConfig,
    dispatch_config: DispatchConfig,
}

impl Default for GatewayRuntimeBuilder {
    fn default() -> Self {
        Self {
            store: None,
            container_runtime: None,
            messaging: None,
            device_api: None,
            http: None,
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080)),
            tenant_id: "default".to_string(),
            cors_origins: Vec::new(),
            max_body_bytes: 10 * 1024 * 1024,
            lifecycle_config: LifecycleConfig::default(),
            dispatch_config: DispatchConfig::default(),
        }
    }
}

impl GatewayRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the device repository (required).
    pub fn store(mut self, store: Arc<dyn DeviceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the container backend (required).
    pub fn container_runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.container_runtime = Some(runtime);
        self
    }

    /// Override how messaging clients are opened.
    ///
    /// Default: clients talking to the device runtime over HTTP.
    pub fn messaging(mut self, factory: Arc<dyn MessagingClientFactory>) -> Self {
        self.messaging = Some(factory);
        self
    }

    /// Override the device runtime webhook API.
    ///
    /// Default: [`HttpDeviceApi`].
    pub fn device_api(mut self, api: Arc<dyn DeviceApi>) -> Self {
        self.device_api = Some(api);
        self
    }

    /// Set the HTTP client shared by the proxy, health probes and device API.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    /// Set the HTTP bind address.
    ///
    /// Default: `0.0.0.0:8080`
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the tenant owning the devices.
    ///
    /// Default: `default`
    pub fn tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    /// Restrict CORS to these origins. Empty allows any origin.
    pub fn cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }

    /// Largest request body buffered by the proxy and the event log.
    ///
    /// Default: 10 MiB
    pub fn max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = bytes;
        self
    }

    /// Set the device container configuration.
    pub fn lifecycle_config(mut self, config: LifecycleConfig) -> Self {
        self.lifecycle_config = config;
        self
    }

    /// Set the bulk send configuration.
    pub fn dispatch_config(mut self, config: DispatchConfig) -> Self {
        self.dispatch_config = config;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<GatewayRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let container_runtime = self
            .container_runtime
            .ok_or_else(|| anyhow::anyhow!("container_runtime is required"))?;
        let http = match self.http {
            Some(client) => client,
            None => reqwest::Client::builder().build()?,
        };

        let registry = Arc::new(DeviceRegistry::new(container_runtime.clone()));
        let lifecycle = Arc::new(DeviceLifecycle::new(
            registry,
            container_runtime,
            http.clone(),
            self.lifecycle_config,
        ));

        let messaging = self.messaging.unwrap_or_else(|| {
            Arc::new(RuntimeClientFactory::new(lifecycle.clone(), http.clone()))
        });
        let device_api = self
            .device_api
            .unwrap_or_else(|| Arc::new(HttpDeviceApi::new(http.clone())));

        let bridge = Arc::new(SessionBridge::new(store.clone(), messaging));
        let dispatcher = Arc::new(BulkDispatcher::new(bridge.clone(), self.dispatch_config));

        let state = Arc::new(AppState {
            tenant_id: self.tenant_id,
            store,
            lifecycle,
            reconciler: Arc::new(WebhookReconciler::new(device_api)),
            bridge,
            dispatcher,
            http,
            max_body_bytes: self.max_body_bytes,
            cors_origins: self.cors_origins,
            metrics: Arc::new(GatewayMetrics::new()?),
            shutdown: CancellationToken::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: Instant::now(),
        });

        Ok(GatewayRuntimeConfig {
            state,
            bind_addr: self.bind_addr,
        })
    }
}

/// Configuration for a [`GatewayRuntime`].
pub struct GatewayRuntimeConfig {
    state: Arc<AppState>,
    bind_addr: SocketAddr,
}

impl GatewayRuntimeConfig {
    /// Shared handler state, for serving the router without binding a socket.
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Consume the configuration, returning the handler state.
    pub fn into_state(self) -> Arc<AppState> {
        self.state
    }

    /// Bind the listener and spawn the HTTP server.
    pub async fn start(self) -> Result<GatewayRuntime> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        let shutdown = self.state.shutdown.clone();
        let server_handle = tokio::spawn(serve(listener, self.state.clone(), shutdown.clone()));

        info!(
            bind_addr = %local_addr,
            tenant_id = %self.state.tenant_id,
            image = %self.state.lifecycle.config().image,
            "GatewayRuntime started"
        );

        Ok(GatewayRuntime {
            server_handle,
            shutdown,
            state: self.state,
            local_addr,
        })
    }
}

/// A running gateway that can be embedded in an application.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct GatewayRuntime {
    server_handle: JoinHandle<std::io::Result<()>>,
    shutdown: CancellationToken,
    state: Arc<AppState>,
    local_addr: SocketAddr,
}

impl GatewayRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> GatewayRuntimeBuilder {
        GatewayRuntimeBuilder::new()
    }

    /// Address the HTTP server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get a reference to the shared handler state.
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Check if the server task is still running.
    pub fn is_running(&self) -> bool {
        !self.server_handle.is_finished()
    }

    /// Gracefully shut down the runtime.
    ///
    /// In-flight bulk sends are cancelled and drained, open messaging clients
    /// are disconnected, then the server stops accepting connections.
    pub async fn shutdown(self) -> Result<()> {
        info!("GatewayRuntime shutting down...");

        self.shutdown.cancel();
        self.state.bridge.release_all().await;

        match self.server_handle.await {
            Ok(Ok(())) => {
                info!("GatewayRuntime shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("GatewayRuntime server error during shutdown: {}", e);
                Err(e.into())
            }
            Err(e) => {
                error!("GatewayRuntime server task panicked: {}", e);
                Err(anyhow::anyhow!("server task panicked: {}", e))
            }
        }
    }
}
