// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Health gate for device runtimes.
//!
//! A freshly started container is not registered until its `/health`
//! endpoint answers 200.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Result of waiting on a device runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthOutcome {
    /// Runtime answered healthy after `attempts` probes.
    Healthy {
        /// Probes sent, including the successful one.
        attempts: u32,
    },
    /// Deadline passed without a healthy answer.
    TimedOut {
        /// Probes sent.
        attempts: u32,
    },
}

impl HealthOutcome {
    /// Whether the runtime became healthy.
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthOutcome::Healthy { .. })
    }
}

/// Polls `GET {base}/health` at a fixed interval until a deadline.
#[derive(Debug, Clone)]
pub struct HealthProbe {
    client: reqwest::Client,
    interval: Duration,
    timeout: Duration,
}

impl HealthProbe {
    /// Create a probe.
    pub fn new(client: reqwest::Client, interval: Duration, timeout: Duration) -> Self {
        Self {
            client,
            interval,
            timeout,
        }
    }

    /// Overall deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send one probe.
    pub async fn check(&self, base_url: &str) -> bool {
        let url = format!("{}/health", base_url.trim_end_matches('/'));
        match self
            .client
            .get(&url)
            .timeout(self.interval.max(Duration::from_secs(1)))
            .send()
            .await
        {
            Ok(resp) => resp.status() == reqwest::StatusCode::OK,
            Err(e) => {
                debug!(url = %url, error = %e, "Health probe failed");
                false
            }
        }
    }

    /// Probe until healthy or until the deadline passes. Always probes at
    /// least once.
    pub async fn wait_until_healthy(&self, base_url: &str) -> HealthOutcome {
        let deadline = Instant::now() + self.timeout;
        let mut attempts = 0;

        loop {
            attempts += 1;
            if self.check(base_url).await {
                return HealthOutcome::Healthy { attempts };
            }
            if Instant::now() + self.interval > deadline {
                return HealthOutcome::TimedOut { attempts };
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}
