// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP handlers for device lifecycle, bulk send and event logs.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use zapgate_core::Error as CoreError;
use zapgate_core::lifecycle::Removal;
use zapgate_core::registry::ContainerDescriptor;
use zapgate_core::store::{EventLogEntry, UpsertDevice};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Default page size for event log listings.
pub const DEFAULT_LOG_LIMIT: i64 = 10;

/// Body of `/create`, `/delete` and `/update`.
#[derive(Debug, Deserialize)]
pub struct DeviceRequest {
    /// Device identity.
    #[serde(default)]
    pub number: String,
}

/// Body of `POST /send/many`.
#[derive(Debug, Deserialize)]
pub struct SendManyRequest {
    /// Sending device.
    #[serde(default)]
    pub device_id: String,
    /// Recipients, 1 to 100.
    #[serde(default)]
    pub numbers: Vec<String>,
    /// Text to send.
    #[serde(default)]
    pub message: String,
}

/// Query of `GET /logs`.
#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    /// Page size.
    pub limit: Option<i64>,
}

/// Query of `GET /logs/number`.
#[derive(Debug, Deserialize)]
pub struct LogsByNumberQuery {
    /// Device identity.
    #[serde(default)]
    pub number: String,
    /// Page size.
    pub limit: Option<i64>,
}

/// Response of `/create` and `/update`.
#[derive(Debug, Serialize)]
pub struct DeviceResponse {
    /// `created` or `updated`.
    pub status: &'static str,
    /// Base URL of the device runtime.
    pub endpoint: String,
    /// Container ID.
    pub id: String,
}

fn device_number(payload: Result<Json<DeviceRequest>, JsonRejection>) -> ApiResult<String> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let number = request.number.trim().to_string();
    if number.is_empty() {
        return Err(ApiError::BadRequest("number is required".to_string()));
    }
    Ok(number)
}

fn log_limit(limit: Option<i64>) -> ApiResult<i64> {
    match limit {
        None => Ok(DEFAULT_LOG_LIMIT),
        Some(limit) if limit > 0 => Ok(limit),
        Some(_) => Err(ApiError::BadRequest("limit must be greater than 0".to_string())),
    }
}

/// Bring the device's container up, record it and push its stored webhooks.
async fn provision(state: &AppState, number: &str) -> ApiResult<ContainerDescriptor> {
    let descriptor = state.lifecycle.create_or_reuse(number).await?;

    state
        .store
        .upsert_device(&UpsertDevice {
            tenant_id: state.tenant_id.clone(),
            number: number.to_string(),
            container_id: Some(descriptor.id.clone()),
            endpoint: Some(descriptor.base_url().to_string()),
            version: Some(state.image_version().to_string()),
        })
        .await?;

    let rules = state.store.list_webhooks(&state.tenant_id, number).await?;
    if !rules.is_empty() {
        state.reconciler.reconcile(&descriptor, &rules).await?;
    }

    state.metrics.device_provisioned();
    Ok(descriptor)
}

/// Remove a device's container, treating "nothing to remove" as done.
async fn teardown(state: &AppState, number: &str) -> ApiResult<()> {
    match state.lifecycle.remove(number).await {
        Ok(Removal::Removed { container_id }) => {
            info!(number = %number, container_id = %container_id, "Device removed");
            Ok(())
        }
        Ok(Removal::AlreadyRemoved) | Err(CoreError::NotFound(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// `POST /create`
pub async fn create_device(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<DeviceRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<DeviceResponse>)> {
    let number = device_number(payload)?;
    let descriptor = provision(&state, &number).await?;

    Ok((
        StatusCode::CREATED,
        Json(DeviceResponse {
            status: "created",
            endpoint: descriptor.base_url().to_string(),
            id: descriptor.id,
        }),
    ))
}

/// `DELETE /delete`
pub async fn delete_device(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<DeviceRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let number = device_number(payload)?;

    state.bridge.release(&state.tenant_id, &number).await;

    // The record stays live until the container is really gone.
    let container_missing = match state.lifecycle.remove(&number).await {
        Ok(_) => false,
        Err(CoreError::NotFound(_)) => true,
        Err(e) => return Err(e.into()),
    };

    let had_record = state
        .store
        .soft_delete_device(&state.tenant_id, &number)
        .await?;
    if container_missing && !had_record {
        return Err(CoreError::NotFound(number).into());
    }

    Ok(Json(json!({ "status": "removed" })))
}

/// `PUT /update`
pub async fn update_device(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<DeviceRequest>, JsonRejection>,
) -> ApiResult<Json<DeviceResponse>> {
    let number = device_number(payload)?;

    let record = state
        .store
        .get_device(&state.tenant_id, &number)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Device not found: {}", number)))?;

    if record.version.as_deref() == Some(state.image_version()) {
        return Err(ApiError::Conflict(format!(
            "device already up to date (version {})",
            state.image_version()
        )));
    }

    info!(
        number = %number,
        from = ?record.version,
        to = %state.image_version(),
        "Updating device container"
    );

    state.bridge.release(&state.tenant_id, &number).await;
    teardown(&state, &number).await?;
    let descriptor = provision(&state, &number).await?;

    Ok(Json(DeviceResponse {
        status: "updated",
        endpoint: descriptor.base_url().to_string(),
        id: descriptor.id,
    }))
}

/// `GET /devices/{number}`
pub async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(number): Path<String>,
) -> ApiResult<Json<Value>> {
    let record = state
        .store
        .get_device(&state.tenant_id, &number)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Device not found: {}", number)))?;

    Ok(Json(json!({
        "status": "found",
        "number": record.number,
        "endpoint": record.endpoint,
        "container_id": record.container_id,
        "version": record.version,
        "server_version": state.image_version(),
        "connected": record.connected,
        "updated_at": record.updated_at,
    })))
}

/// `POST /send/many`
///
/// The dispatch runs in its own task. If the caller goes away, or the server
/// shuts down, the dispatch is cancelled and drains instead of being dropped
/// mid-send.
pub async fn send_many(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SendManyRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if request.device_id.trim().is_empty() {
        return Err(ApiError::BadRequest("device_id is required".to_string()));
    }

    let cancel = state.shutdown.child_token();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let dispatcher = state.dispatcher.clone();
    let tenant_id = state.tenant_id.clone();
    let task = tokio::spawn(async move {
        dispatcher
            .send_many(
                &tenant_id,
                &request.device_id,
                &request.numbers,
                &request.message,
                &cancel,
            )
            .await
    });

    let summary = task
        .await
        .map_err(|e| ApiError::Internal(format!("dispatch task failed: {}", e)))??;
    state.metrics.record_dispatch(&summary);

    Ok(Json(json!({
        "status": "sent",
        "sent_to": summary.sent,
        "failed": summary.failed,
        "expired": summary.expired,
        "skipped": summary.skipped,
    })))
}

/// `GET /logs`
pub async fn list_logs(
    State(state): State<Arc<AppState>>,
    query: Result<Query<LogsQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<EventLogEntry>>> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let limit = log_limit(query.limit)?;
    Ok(Json(state.store.list_event_logs(None, limit).await?))
}

/// `GET /logs/number`
pub async fn list_logs_by_number(
    State(state): State<Arc<AppState>>,
    query: Result<Query<LogsByNumberQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<EventLogEntry>>> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if query.number.trim().is_empty() {
        return Err(ApiError::BadRequest("number is required".to_string()));
    }
    let limit = log_limit(query.limit)?;
    Ok(Json(
        state
            .store
            .list_event_logs(Some(query.number.trim()), limit)
            .await?,
    ))
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": state.version,
        "uptime_ms": state.uptime_ms(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_limit() {
        assert_eq!(log_limit(None).unwrap(), DEFAULT_LOG_LIMIT);
        assert_eq!(log_limit(Some(3)).unwrap(), 3);
        assert!(log_limit(Some(0)).is_err());
        assert!(log_limit(Some(-1)).is_err());
    }

    #[test]
    fn test_send_many_request_defaults() {
        let request: SendManyRequest = serde_json::from_str(r#"{"device_id":"5511"}"#).unwrap();
        assert!(request.numbers.is_empty());
        assert!(request.message.is_empty());
    }
}
