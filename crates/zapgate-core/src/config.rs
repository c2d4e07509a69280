// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Environment parsing helpers shared by the component configurations.
//!
//! Each component owns its configuration struct (`LifecycleConfig`,
//! `DispatchConfig`, `DockerCliConfig`) with a `Default` impl and a
//! `from_env()` constructor built on these helpers.

use std::str::FromStr;
use std::time::Duration;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// A variable is present but cannot be parsed.
    #[error("Invalid value for {var}: {value}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },
}

/// Read a non-empty environment variable.
pub fn env_opt(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

/// Parse an environment variable, falling back to `default` when unset.
pub fn env_parse<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env_opt(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        None => Ok(default),
    }
}

/// Parse a millisecond duration from an environment variable.
pub fn env_millis(var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    env_parse(var, default.as_millis() as u64).map(Duration::from_millis)
}

/// Parse a second duration from an environment variable.
pub fn env_secs(var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    env_parse(var, default.as_secs()).map(Duration::from_secs)
}
