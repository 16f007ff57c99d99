//! OpenAPI specification for the classbeacon API.
//!
//! Served at `/api/openapi.json`, rendered by Swagger UI at `/docs`, and
//! written to disk by the `gen-openapi` binary for client generation.

use axum::Json;
use classbeacon_core::{
    AttendanceStats, AttendanceStatus, Capability, ConnectedDevice, Device, HealthResponse,
    Notification, NotificationLevel, RateBand, ScanSummary, SessionRole, SessionSnapshot,
    StudentRecord,
};
use utoipa::OpenApi;

use super::attendance::{AttendanceResponse, CheckInRequest, CheckInResponse, MarkPendingRequest};
use super::bluetooth::ConnectResponse;
use super::devices::{
    ClearDevicesResponse, DevicesResponse, RecordSightingRequest, RecordSightingResponse,
    ScanResponse,
};
use super::error::ErrorResponse;
use super::notifications::NotificationsResponse;
use super::session::{StartSessionRequest, StopSessionResponse};

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// The OpenAPI specification as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for classbeacon.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "classbeacon API",
        version = "0.1.0",
        description = r#"
# classbeacon API

Classroom attendance over Bluetooth Low Energy proximity.

## Flow

1. The teacher starts a session (`startSession`). The server broadcasts a
   beacon carrying a class code and counts elapsed time.
2. Students scan for the beacon (`scanDevices`) and check in with the signal
   strength they observed (`checkIn`).
3. Check-ins within the proximity threshold go `pending`, then `present` or
   `late` once confirmed.
4. The teacher reviews statistics and downloads the CSV (`exportAttendance`).

Stopping the session cancels its timer, any in-flight scan and any pending
confirmation.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local classbeacon server")
    ),
    tags(
        (name = "system", description = "Health checks and notifications"),
        (name = "session", description = "Teacher and student session lifecycle"),
        (name = "devices", description = "Beacon scanning and the discovered-device registry"),
        (name = "bluetooth", description = "Hardware capability and demo connections"),
        (name = "attendance", description = "Per-student attendance, statistics and CSV export")
    ),
    paths(
        super::health::health_check,
        super::notifications::list_notifications,
        super::session::get_session,
        super::session::start_session,
        super::session::stop_session,
        super::devices::list_devices,
        super::devices::record_sighting,
        super::devices::clear_devices,
        super::devices::scan_devices,
        super::bluetooth::get_capability,
        super::bluetooth::connect_device,
        super::attendance::get_attendance,
        super::attendance::get_stats,
        super::attendance::mark_pending,
        super::attendance::confirm_student,
        super::attendance::check_in,
        super::attendance::reset_attendance,
        super::attendance::export_attendance,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            Notification,
            NotificationLevel,
            NotificationsResponse,
            SessionRole,
            SessionSnapshot,
            StartSessionRequest,
            StopSessionResponse,
            Device,
            DevicesResponse,
            RecordSightingRequest,
            RecordSightingResponse,
            ClearDevicesResponse,
            ScanSummary,
            ScanResponse,
            Capability,
            ConnectedDevice,
            ConnectResponse,
            AttendanceStatus,
            RateBand,
            StudentRecord,
            AttendanceStats,
            AttendanceResponse,
            MarkPendingRequest,
            CheckInRequest,
            CheckInResponse,
        )
    )
)]
pub struct ApiDoc;
