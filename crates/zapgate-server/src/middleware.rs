// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request event log.
//!
//! Every request except `/health` and `/metrics` is appended to the event log with its
//! caller, target and resulting status. Lifecycle requests also keep their
//! body so the device number can be recovered from it.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use tracing::warn;

use zapgate_core::store::EventLogEntry;

use crate::error::ApiError;
use crate::proxy::split_device_path;
use crate::state::AppState;

const LIFECYCLE_PATHS: [&str; 3] = ["/create", "/delete", "/update"];

/// Probe and scrape endpoints kept out of the event log.
const UNLOGGED_PATHS: [&str; 2] = ["/health", "/metrics"];

/// Caller IP from forwarding headers, falling back to the peer address.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return forwarded.to_string();
    }
    if let Some(real) = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return real.to_string();
    }
    peer.map(|addr| addr.ip().to_string()).unwrap_or_default()
}

fn number_from_body(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value
        .get("number")
        .and_then(|n| n.as_str())
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(String::from)
}

/// Middleware appending one event log entry per request.
pub async fn event_log(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    if UNLOGGED_PATHS.contains(&path.as_str()) {
        return next.run(request).await;
    }

    let method = request.method().to_string();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let ip = client_ip(request.headers(), peer);
    let user_agent = request
        .headers()
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let (request, request_body, number) = if LIFECYCLE_PATHS.contains(&path.as_str()) {
        let (parts, body) = request.into_parts();
        let bytes = match to_bytes(body, state.max_body_bytes).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return ApiError::BadRequest(format!("failed to read request body: {}", e))
                    .into_response();
            }
        };
        let number = number_from_body(&bytes);
        let text = String::from_utf8_lossy(&bytes).into_owned();
        (Request::from_parts(parts, Body::from(bytes)), Some(text), number)
    } else {
        let number = split_device_path(&path).map(|(identity, _)| identity.to_string());
        (request, None, number)
    };

    let response = next.run(request).await;

    let entry = EventLogEntry {
        id: None,
        number,
        ip,
        method,
        endpoint: path,
        user_agent,
        status_code: i32::from(response.status().as_u16()),
        request_body,
        created_at: Utc::now(),
    };
    if let Err(e) = state.store.insert_event_log(&entry).await {
        warn!(error = %e, endpoint = %entry.endpoint, "Failed to record event log");
    }

    response
}
