// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Zapgate Server - Multi-tenant WhatsApp Device Gateway
//!
//! An HTTP server responsible for:
//! - Device lifecycle (create, delete, update one container per number)
//! - Proxying device API calls to the owning container
//! - Webhook persistence and replay
//! - Bulk sends with bounded concurrency

use std::sync::Arc;
use tracing::{info, warn};

use zapgate_core::runtime::{ContainerRuntime, DockerCli};
use zapgate_core::store::{DeviceStore, MemoryStore, PostgresStore};
use zapgate_server::config::Config;
use zapgate_server::runtime::GatewayRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zapgate_server=info,zapgate_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        http_addr = %config.http_addr,
        tenant_id = %config.tenant_id,
        image = %config.lifecycle.image,
        workers = config.dispatch.workers,
        "Starting Zapgate Server"
    );

    let store: Arc<dyn DeviceStore> = match &config.database_url {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await?;
            info!("Connected to database");

            let store = PostgresStore::new(pool);
            store.migrate().await?;
            info!("Database schema verified");

            Arc::new(store)
        }
        None => {
            warn!("No database configured, device state is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let docker = Arc::new(DockerCli::new(config.docker.clone()));
    info!(runtime_type = docker.runtime_type(), "Container runtime initialized");

    let runtime = GatewayRuntime::builder()
        .store(store)
        .container_runtime(docker)
        .tenant_id(&config.tenant_id)
        .cors_origins(config.cors_origins.clone())
        .max_body_bytes(config.max_body_bytes)
        .lifecycle_config(config.lifecycle.clone())
        .dispatch_config(config.dispatch.clone())
        .bind_addr(config.http_addr)
        .build()?
        .start()
        .await?;

    info!(addr = %runtime.local_addr(), "Zapgate server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Zapgate Server shut down");

    Ok(())
}
