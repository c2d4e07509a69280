// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Prometheus metrics, served at `GET /metrics`.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `zapgate_http_requests_total` | Counter | `method`, `status` |
//! | `zapgate_http_request_duration_seconds` | Histogram | `method` |
//! | `zapgate_devices_provisioned_total` | Counter | |
//! | `zapgate_bulk_send_outcomes_total` | Counter | `outcome` |

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use thiserror::Error;
use tracing::error;

use zapgate_core::dispatch::DispatchSummary;

use crate::state::AppState;

/// Errors from building or encoding metrics.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// A metric could not be created or registered.
    #[error("failed to register metric: {0}")]
    Registration(#[from] prometheus::Error),

    /// The registry could not be rendered.
    #[error("failed to encode metrics: {0}")]
    Encoding(String),
}

/// Gateway metrics and the registry they live in.
pub struct GatewayMetrics {
    registry: Registry,
    http_requests_total: IntCounterVec,
    http_request_duration: HistogramVec,
    devices_provisioned_total: IntCounter,
    bulk_send_outcomes_total: IntCounterVec,
}

impl GatewayMetrics {
    /// Create and register every gateway metric.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("zapgate_http_requests_total", "HTTP requests handled"),
            &["method", "status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let http_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "zapgate_http_request_duration_seconds",
                "HTTP request latency",
            ),
            &["method"],
        )?;
        registry.register(Box::new(http_request_duration.clone()))?;

        let devices_provisioned_total = IntCounter::new(
            "zapgate_devices_provisioned_total",
            "Devices created, reused or recreated through the API",
        )?;
        registry.register(Box::new(devices_provisioned_total.clone()))?;

        let bulk_send_outcomes_total = IntCounterVec::new(
            Opts::new(
                "zapgate_bulk_send_outcomes_total",
                "Per-recipient outcomes of bulk sends",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(bulk_send_outcomes_total.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration,
            devices_provisioned_total,
            bulk_send_outcomes_total,
        })
    }

    /// Count one finished request.
    pub fn observe_request(&self, method: &str, status: u16, seconds: f64) {
        let status = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, status.as_str()])
            .inc();
        self.http_request_duration
            .with_label_values(&[method])
            .observe(seconds);
    }

    /// Count a device brought up by create or update.
    pub fn device_provisioned(&self) {
        self.devices_provisioned_total.inc();
    }

    /// Add the outcomes of one bulk send.
    pub fn record_dispatch(&self, summary: &DispatchSummary) {
        for (outcome, count) in [
            ("sent", summary.sent),
            ("failed", summary.failed),
            ("device_expired", summary.expired),
            ("skipped", summary.skipped),
        ] {
            self.bulk_send_outcomes_total
                .with_label_values(&[outcome])
                .inc_by(count as u64);
        }
    }

    /// Render every metric in the Prometheus text format.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| MetricsError::Encoding(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::Encoding(e.to_string()))
    }
}

/// Middleware counting every request and its latency.
pub async fn track_requests(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let started = Instant::now();
    let response = next.run(request).await;
    state.metrics.observe_request(
        &method,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// `GET /metrics`
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.encode_text() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_recorded_values() {
        let metrics = GatewayMetrics::new().unwrap();
        metrics.observe_request("POST", 201, 0.01);
        metrics.device_provisioned();
        metrics.record_dispatch(&DispatchSummary {
            requested: 3,
            sent: 2,
            failed: 1,
            ..Default::default()
        });

        let text = metrics.encode_text().unwrap();
        assert!(text.contains(r#"zapgate_http_requests_total{method="POST",status="201"} 1"#));
        assert!(text.contains("zapgate_devices_provisioned_total 1"));
        assert!(text.contains(r#"zapgate_bulk_send_outcomes_total{outcome="sent"} 2"#));
        assert!(text.contains(r#"zapgate_bulk_send_outcomes_total{outcome="failed"} 1"#));
    }
}
