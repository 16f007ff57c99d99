//! Device registry endpoints.
//!
//! Scans run under the session's cancellation scope, so stopping the session
//! ends a scan early instead of letting it write into a stale view.

use std::time::Duration;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use classbeacon_core::{run_scan, Device, ScanSummary};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use utoipa::{IntoParams, ToSchema};

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Longest scan window a client may request.
const MAX_SCAN_WINDOW_SECS: u64 = 60;

/// Creates the devices router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_devices).delete(clear_devices))
        .route("/sightings", post(record_sighting))
        .route("/scan", post(scan_devices))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Registry contents.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DevicesResponse {
    /// Devices in first-sighting order.
    pub devices: Vec<Device>,

    /// Number of devices.
    #[schema(example = 3)]
    pub count: usize,
}

/// A single advertisement reported by a client-side scanner.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": "12:34:56:78:9A:01",
    "name": "Teacher Beacon CS101",
    "rssi_dbm": -45
}))]
pub struct RecordSightingRequest {
    /// Device identifier.
    pub id: String,

    /// Broadcast name, if any.
    pub name: Option<String>,

    /// Signal strength in dBm.
    pub rssi_dbm: i16,
}

/// Result of recording a sighting.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RecordSightingResponse {
    /// Whether the device was not in the registry before.
    pub new_device: bool,

    /// The registry entry after the sighting.
    pub device: Device,
}

/// Result of clearing the registry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClearDevicesResponse {
    /// Entries removed.
    pub cleared: usize,
}

/// Scan parameters.
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ScanParams {
    /// Scan window in seconds. Defaults to the configured window.
    pub window_secs: Option<u64>,
}

/// Scan result.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ScanResponse {
    /// What the scan saw.
    pub summary: ScanSummary,

    /// Registry contents after the scan.
    pub devices: Vec<Device>,

    /// Window that was requested.
    #[schema(example = 10)]
    pub window_secs: u64,

    /// When the scan ended.
    pub scanned_at_utc: DateTime<Utc>,
}

// ============================================================================
// Handlers
// ============================================================================

/// List discovered devices.
#[utoipa::path(
    get,
    path = "/api/devices",
    tag = "devices",
    operation_id = "listDevices",
    summary = "List discovered devices",
    description = "Returns every device seen within the registry TTL, oldest \
        sighting first. Stale entries are dropped before the read.",
    responses(
        (status = 200, description = "Registry contents", body = DevicesResponse)
    )
)]
pub async fn list_devices(State(state): State<SharedState>) -> Json<DevicesResponse> {
    let mut registry = state.registry().write().await;
    registry.expire();
    let devices = registry.devices();

    Json(DevicesResponse {
        count: devices.len(),
        devices,
    })
}

/// Record one sighting.
#[utoipa::path(
    post,
    path = "/api/devices/sightings",
    tag = "devices",
    operation_id = "recordSighting",
    summary = "Record a device sighting",
    description = "Adds a device to the registry, or refreshes its last-seen \
        time if it is already known. The name and signal strength of the \
        first sighting are kept.",
    request_body = RecordSightingRequest,
    responses(
        (status = 200, description = "Sighting recorded", body = RecordSightingResponse),
        (status = 400, description = "Missing device id", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn record_sighting(
    State(state): State<SharedState>,
    Json(request): Json<RecordSightingRequest>,
) -> ApiResult<Json<RecordSightingResponse>> {
    let id = request.id.trim();
    if id.is_empty() {
        return Err(ApiError::bad_request("invalid_device_id", "Device id must not be empty"));
    }

    let mut registry = state.registry().write().await;
    let new_device = registry.record_sighting(id, request.name.as_deref(), request.rssi_dbm);
    let device = registry.get(id).cloned().ok_or_else(|| ApiError::InternalError {
        error_code: "registry_inconsistent".to_string(),
        message: format!("Device '{id}' missing right after being recorded"),
    })?;

    Ok(Json(RecordSightingResponse { new_device, device }))
}

/// Clear the registry.
#[utoipa::path(
    delete,
    path = "/api/devices",
    tag = "devices",
    operation_id = "clearDevices",
    summary = "Clear discovered devices",
    description = "Empties the registry, as when leaving the scanning view.",
    responses(
        (status = 200, description = "Registry cleared", body = ClearDevicesResponse)
    )
)]
pub async fn clear_devices(State(state): State<SharedState>) -> Json<ClearDevicesResponse> {
    let mut registry = state.registry().write().await;
    let cleared = registry.len();
    registry.clear();
    info!(cleared, "Device registry cleared");

    Json(ClearDevicesResponse { cleared })
}

/// Run a scan.
#[utoipa::path(
    post,
    path = "/api/devices/scan",
    tag = "devices",
    operation_id = "scanDevices",
    summary = "Scan for beacons",
    description = "Scans for the configured window and records every sighting. \
        Requires an active session; the scan ends early if the session stops.",
    params(ScanParams),
    responses(
        (status = 200, description = "Scan finished", body = ScanResponse),
        (status = 400, description = "Invalid scan window", body = crate::api::error::ErrorResponse),
        (status = 409, description = "No session is active", body = crate::api::error::ErrorResponse),
        (status = 503, description = "Bluetooth unavailable", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn scan_devices(
    State(state): State<SharedState>,
    Query(params): Query<ScanParams>,
) -> ApiResult<Json<ScanResponse>> {
    let window_secs = params.window_secs.unwrap_or(state.config().scan.window_secs);
    if window_secs == 0 || window_secs > MAX_SCAN_WINDOW_SECS {
        return Err(ApiError::bad_request(
            "invalid_scan_window",
            format!("Scan window must be between 1 and {MAX_SCAN_WINDOW_SECS} seconds"),
        ));
    }

    let (session_id, token) = state
        .session()
        .read()
        .await
        .scope()
        .map_err(|e| state.report(e))?;

    state.notifier().info("Scan started");
    let summary = run_scan(
        state.radio().as_ref(),
        state.registry(),
        Duration::from_secs(window_secs),
        token,
    )
    .await
    .map_err(|e| state.report(e))?;

    let devices = {
        let mut registry = state.registry().write().await;
        registry.expire();
        registry.devices()
    };
    // The session may have been replaced while the scan was winding down.
    if !state
        .session()
        .write()
        .await
        .set_connected_devices(session_id, devices.len())
    {
        debug!(%session_id, "Scan outlived its session, counter not updated");
    }

    if summary.cancelled {
        state.notifier().info("Scan cancelled - session stopped");
    } else {
        state
            .notifier()
            .info(format!("Scan finished - {} device(s) nearby", devices.len()));
    }

    Ok(Json(ScanResponse {
        summary,
        devices,
        window_secs,
        scanned_at_utc: state.clock().now(),
    }))
}
