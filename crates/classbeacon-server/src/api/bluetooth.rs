//! Bluetooth capability and demo connection endpoints.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use classbeacon_core::{connect_with_retry, Capability, ConnectFilter, ConnectedDevice};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the bluetooth router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/capability", get(get_capability))
        .route("/connect", post(connect_device))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Demo connection result.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "device": { "id": "C0:FF:EE:00:00:04", "name": "Fitness Band" },
    "connected_at_utc": "2024-09-02T09:01:00Z"
}))]
pub struct ConnectResponse {
    /// The connected peripheral.
    pub device: ConnectedDevice,

    /// When the connection was established.
    pub connected_at_utc: DateTime<Utc>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Probe Bluetooth support.
#[utoipa::path(
    get,
    path = "/api/bluetooth/capability",
    tag = "bluetooth",
    operation_id = "getCapability",
    summary = "Probe Bluetooth capability",
    description = "Reports whether this host can scan for and broadcast beacons. \
        Clients should call this before offering scan or beacon controls.",
    responses(
        (status = 200, description = "Capability report", body = Capability)
    )
)]
pub async fn get_capability(State(state): State<SharedState>) -> Json<Capability> {
    Json(state.radio().probe().await)
}

/// Connect to a battery-service peripheral.
#[utoipa::path(
    post,
    path = "/api/bluetooth/connect",
    tag = "bluetooth",
    operation_id = "connectDevice",
    summary = "Connect to a nearby device",
    description = "Connects to the first device offering the battery service, \
        retrying transient failures with exponential backoff.",
    responses(
        (status = 200, description = "Connected", body = ConnectResponse),
        (status = 404, description = "No matching device", body = crate::api::error::ErrorResponse),
        (status = 503, description = "Bluetooth unavailable or connection failed", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn connect_device(State(state): State<SharedState>) -> ApiResult<Json<ConnectResponse>> {
    let policy = state.config().retry_policy();
    let device = connect_with_retry(
        state.radio().as_ref(),
        &ConnectFilter::battery_service(),
        &policy,
    )
    .await
    .map_err(|e| state.report(e))?;

    state
        .notifier()
        .success(format!("Connected to {}", device.name));

    Ok(Json(ConnectResponse {
        device,
        connected_at_utc: state.clock().now(),
    }))
}
