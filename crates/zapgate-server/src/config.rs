// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for zapgate-server.

use std::net::SocketAddr;

use zapgate_core::config::{env_opt, env_parse};
use zapgate_core::dispatch::DispatchConfig;
use zapgate_core::lifecycle::LifecycleConfig;
use zapgate_core::runtime::DockerCliConfig;

pub use zapgate_core::config::ConfigError;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address
    pub http_addr: SocketAddr,
    /// PostgreSQL URL; the in-memory store is used when unset
    pub database_url: Option<String>,
    /// Tenant that owns the devices managed by this gateway
    pub tenant_id: String,
    /// Allowed CORS origins; empty means any
    pub cors_origins: Vec<String>,
    /// Largest request body buffered by the proxy and the event log
    pub max_body_bytes: usize,
    /// Device container lifecycle
    pub lifecycle: LifecycleConfig,
    /// Bulk send pacing
    pub dispatch: DispatchConfig,
    /// Docker CLI backend
    pub docker: DockerCliConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port: u16 = env_parse("ZAPGATE_HTTP_PORT", 8080)?;
        let http_addr = SocketAddr::from(([0, 0, 0, 0], port));

        let database_url = env_opt("ZAPGATE_DATABASE_URL").or_else(|| env_opt("DATABASE_URL"));

        let tenant_id = env_opt("ZAPGATE_TENANT").unwrap_or_else(|| "default".to_string());

        let cors_origins = parse_origins(env_opt("CORS_ALLOWED_ORIGINS").as_deref());

        Ok(Self {
            http_addr,
            database_url,
            tenant_id,
            cors_origins,
            max_body_bytes: env_parse("ZAPGATE_MAX_BODY_BYTES", 10 * 1024 * 1024)?,
            lifecycle: LifecycleConfig::from_env()?,
            dispatch: DispatchConfig::from_env()?,
            docker: DockerCliConfig::from_env()?,
        })
    }
}

/// Split a comma-separated origin list. `*` or nothing means any origin.
fn parse_origins(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    let origins: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(String::from)
        .collect();
    if origins.iter().any(|o| o == "*") {
        return Vec::new();
    }
    origins
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_origins() {
        assert!(parse_origins(None).is_empty());
        assert!(parse_origins(Some("*")).is_empty());
        assert!(parse_origins(Some("https://a.com, *")).is_empty());
        assert_eq!(
            parse_origins(Some("https://a.com, https://b.com,")),
            vec!["https://a.com".to_string(), "https://b.com".to_string()]
        );
    }
}
