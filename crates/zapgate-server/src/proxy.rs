// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Device proxy.
//!
//! `ANY /device/{identity}/{rest}` is forwarded to `{rest}` on the device's
//! runtime, keeping method, headers, body and query string. The device is
//! created on first use.
//!
//! `POST /device/{identity}/webhook/register` is intercepted: the rule is
//! validated and defaulted, then persisted once the device is resolved and
//! before it is forwarded, so the stored webhook set can be replayed onto a
//! recreated container.

use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::{self, HeaderMap, HeaderName, Method, header};
use axum::response::Response;
use bytes::Bytes;
use tracing::{debug, info};

use zapgate_core::webhook::{REGISTER_PATH, RegisterWebhookPayload, WebhookRule};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Prefix of proxied routes.
pub const DEVICE_PREFIX: &str = "/device";

/// Split `/device/{identity}/{rest}` into the identity and `/{rest}`.
///
/// Returns `None` when the identity segment is missing or empty.
pub fn split_device_path(path: &str) -> Option<(&str, String)> {
    let tail = path.strip_prefix(DEVICE_PREFIX)?.strip_prefix('/')?;
    let (identity, rest) = match tail.split_once('/') {
        Some((identity, rest)) => (identity, format!("/{}", rest)),
        None => (tail, "/".to_string()),
    };
    if identity.is_empty() {
        return None;
    }
    Some((identity, rest))
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    name == header::CONNECTION
        || name == header::PROXY_AUTHENTICATE
        || name == header::PROXY_AUTHORIZATION
        || name == header::TE
        || name == header::TRAILER
        || name == header::TRANSFER_ENCODING
        || name == header::UPGRADE
        || name == header::HOST
        || name == header::CONTENT_LENGTH
        || name.as_str() == "keep-alive"
}

fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Decode and normalize a webhook registration. The number defaults to the device identity.
fn parse_register(identity: &str, body: &[u8]) -> ApiResult<WebhookRule> {
    let mut payload: RegisterWebhookPayload = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("invalid webhook payload: {}", e)))?;
    if payload.number.trim().is_empty() {
        payload.number = identity.to_string();
    }
    Ok(payload.into_rule()?)
}

/// Persist a registration and return the body the device runtime should see.
async fn persist_register(state: &AppState, identity: &str, rule: &WebhookRule) -> ApiResult<Bytes> {
    let inserted = state
        .store
        .insert_webhook(&state.tenant_id, identity, rule)
        .await?;

    info!(
        number = %identity,
        phrase = %rule.phrase,
        callback_url = %rule.callback_url,
        method = %rule.method,
        new = inserted,
        "Webhook rule stored"
    );

    let forwarded = serde_json::to_vec(&RegisterWebhookPayload::from(rule))
        .map_err(|e| ApiError::Internal(format!("failed to encode webhook payload: {}", e)))?;
    Ok(Bytes::from(forwarded))
}

/// `ANY /device/{identity}/{*rest}`
pub async fn forward(State(state): State<Arc<AppState>>, request: Request) -> ApiResult<Response> {
    let (parts, body) = request.into_parts();

    let (identity, rest) = split_device_path(parts.uri.path())
        .ok_or_else(|| ApiError::BadRequest("device identity is required".to_string()))?;

    let mut body = to_bytes(body, state.max_body_bytes)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read request body: {}", e)))?;

    let register = if parts.method == Method::POST && rest.trim_end_matches('/') == REGISTER_PATH {
        Some(parse_register(identity, &body)?)
    } else {
        None
    };

    let descriptor = state.lifecycle.create_or_reuse(identity).await?;

    if let Some(rule) = &register {
        body = persist_register(&state, identity, rule).await?;
    }

    let mut url = descriptor.url_for(&rest);
    if let Some(query) = parts.uri.query() {
        url.push('?');
        url.push_str(query);
    }

    debug!(number = %identity, method = %parts.method, url = %url, "Proxying device request");

    let upstream = state
        .http
        .request(parts.method.clone(), &url)
        .headers(forwardable(&parts.headers))
        .body(body)
        .send()
        .await
        .map_err(|e| ApiError::BadGateway(format!("device {} unreachable: {}", identity, e)))?;

    let status = upstream.status();
    let headers = forwardable(upstream.headers());
    let payload = upstream
        .bytes()
        .await
        .map_err(|e| ApiError::BadGateway(format!("device {} response failed: {}", identity, e)))?;

    let mut response = http::Response::builder().status(status);
    if let Some(out) = response.headers_mut() {
        out.extend(headers);
    }
    response
        .body(Body::from(payload))
        .map_err(|e| ApiError::Internal(format!("failed to build proxy response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_device_path() {
        assert_eq!(
            split_device_path("/device/5511/webhook/register"),
            Some(("5511", "/webhook/register".to_string()))
        );
        assert_eq!(
            split_device_path("/device/5511"),
            Some(("5511", "/".to_string()))
        );
        assert_eq!(
            split_device_path("/device/5511/"),
            Some(("5511", "/".to_string()))
        );
        assert_eq!(split_device_path("/device/"), None);
        assert_eq!(split_device_path("/device//send"), None);
        assert_eq!(split_device_path("/device"), None);
        assert_eq!(split_device_path("/devices/5511"), None);
    }

    #[test]
    fn test_forwardable_drops_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "gateway".parse().unwrap());
        headers.insert(header::CONNECTION, "keep-alive".parse().unwrap());
        headers.insert(header::CONTENT_LENGTH, "12".parse().unwrap());
        headers.insert(header::AUTHORIZATION, "Bearer x".parse().unwrap());
        headers.append("x-custom", "a".parse().unwrap());
        headers.append("x-custom", "b".parse().unwrap());

        let out = forwardable(&headers);
        assert!(out.get(header::HOST).is_none());
        assert!(out.get(header::CONNECTION).is_none());
        assert!(out.get(header::CONTENT_LENGTH).is_none());
        assert_eq!(out.get(header::AUTHORIZATION).unwrap(), "Bearer x");
        assert_eq!(out.get_all("x-custom").iter().count(), 2);
    }
}
