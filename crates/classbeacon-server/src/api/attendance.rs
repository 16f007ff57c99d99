//! Attendance ledger endpoints.
//!
//! A check-in validates the reported signal, marks the student pending and
//! schedules the confirmation on a task tied to the running session.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use classbeacon_core::{
    check_proximity, export_csv, export_filename, AttendanceStats, StudentRecord,
    CSV_CONTENT_TYPE,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the attendance router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_attendance))
        .route("/stats", get(get_stats))
        .route("/reset", post(reset_attendance))
        .route("/export", get(export_attendance))
        .route("/students/{id}/pending", post(mark_pending))
        .route("/students/{id}/confirm", post(confirm_student))
        .route("/students/{id}/check-in", post(check_in))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Ledger contents.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AttendanceResponse {
    /// Records in roster order.
    pub records: Vec<StudentRecord>,

    /// Aggregate numbers.
    pub stats: AttendanceStats,

    /// When the current class period opened.
    pub opened_at_utc: DateTime<Utc>,
}

/// Mark pending request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "rssi_dbm": -52 }))]
pub struct MarkPendingRequest {
    /// Signal strength at detection, if known.
    #[serde(default)]
    pub rssi_dbm: Option<i16>,
}

/// Check-in request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "rssi_dbm": -52 }))]
pub struct CheckInRequest {
    /// Signal strength of the teacher's beacon as seen by the student.
    pub rssi_dbm: i16,
}

/// Check-in response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckInResponse {
    /// The student, now pending.
    pub student: StudentRecord,

    /// Delay until the automatic confirmation.
    #[schema(example = 2000)]
    pub confirm_after_ms: u64,
}

// ============================================================================
// Handlers
// ============================================================================

async fn attendance_response(state: &SharedState) -> AttendanceResponse {
    let ledger = state.ledger().read().await;
    AttendanceResponse {
        records: ledger.snapshot(),
        stats: ledger.stats(),
        opened_at_utc: ledger.opened_at(),
    }
}

/// Get all records and statistics.
#[utoipa::path(
    get,
    path = "/api/attendance",
    tag = "attendance",
    operation_id = "getAttendance",
    summary = "Get attendance",
    description = "Returns every student record in roster order with the \
        aggregate statistics.",
    responses(
        (status = 200, description = "Ledger contents", body = AttendanceResponse)
    )
)]
pub async fn get_attendance(State(state): State<SharedState>) -> Json<AttendanceResponse> {
    Json(attendance_response(&state).await)
}

/// Get statistics only.
#[utoipa::path(
    get,
    path = "/api/attendance/stats",
    tag = "attendance",
    operation_id = "getAttendanceStats",
    summary = "Get attendance statistics",
    description = "Returns counts per status and the rounded attendance rate. \
        Late students count as present in the rate.",
    responses(
        (status = 200, description = "Statistics", body = AttendanceStats)
    )
)]
pub async fn get_stats(State(state): State<SharedState>) -> Json<AttendanceStats> {
    Json(state.ledger().read().await.stats())
}

/// Mark a student pending.
#[utoipa::path(
    post,
    path = "/api/attendance/students/{id}/pending",
    tag = "attendance",
    operation_id = "markPending",
    summary = "Mark a student pending",
    description = "Moves an absent student to pending after their signal was \
        detected. Fails with 409 unless the student is absent.",
    params(("id" = String, Path, description = "Student id")),
    request_body = MarkPendingRequest,
    responses(
        (status = 200, description = "Student is pending", body = StudentRecord),
        (status = 404, description = "Unknown student", body = crate::api::error::ErrorResponse),
        (status = 409, description = "Student is not absent", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn mark_pending(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(request): Json<MarkPendingRequest>,
) -> ApiResult<Json<StudentRecord>> {
    let mut ledger = state.ledger().write().await;
    let record = ledger
        .mark_pending(&id, request.rssi_dbm)
        .map_err(|e| state.report(e))?
        .clone();
    Ok(Json(record))
}

/// Confirm a pending student.
#[utoipa::path(
    post,
    path = "/api/attendance/students/{id}/confirm",
    tag = "attendance",
    operation_id = "confirmStudent",
    summary = "Confirm a pending student",
    description = "Marks a pending student present, or late when the class \
        period opened longer ago than the late threshold. Fails with 409 \
        unless the student is pending.",
    params(("id" = String, Path, description = "Student id")),
    responses(
        (status = 200, description = "Student confirmed", body = StudentRecord),
        (status = 404, description = "Unknown student", body = crate::api::error::ErrorResponse),
        (status = 409, description = "Student is not pending", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn confirm_student(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StudentRecord>> {
    let mut ledger = state.ledger().write().await;
    let record = ledger.confirm(&id).map_err(|e| state.report(e))?.clone();
    state
        .notifier()
        .success(format!("{} marked {}", record.name, record.status));
    Ok(Json(record))
}

/// Check a student in by signal strength.
#[utoipa::path(
    post,
    path = "/api/attendance/students/{id}/check-in",
    tag = "attendance",
    operation_id = "checkIn",
    summary = "Check a student in",
    description = "Requires an active session. Rejects signals weaker than the \
        proximity threshold, marks the student pending and confirms them after \
        the configured delay. Stopping the session cancels the confirmation.",
    params(("id" = String, Path, description = "Student id")),
    request_body = CheckInRequest,
    responses(
        (status = 200, description = "Student is pending confirmation", body = CheckInResponse),
        (status = 400, description = "Signal too weak", body = crate::api::error::ErrorResponse),
        (status = 404, description = "Unknown student", body = crate::api::error::ErrorResponse),
        (status = 409, description = "No active session or student not absent", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn check_in(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(request): Json<CheckInRequest>,
) -> ApiResult<Json<CheckInResponse>> {
    let (_, token) = state
        .session()
        .read()
        .await
        .scope()
        .map_err(|e| state.report(e))?;

    check_proximity(
        request.rssi_dbm,
        state.config().attendance.proximity_threshold_dbm,
    )
    .map_err(|e| state.report(e))?;

    let student = state
        .ledger()
        .write()
        .await
        .mark_pending(&id, Some(request.rssi_dbm))
        .map_err(|e| state.report(e))?
        .clone();
    state
        .notifier()
        .info(format!("{} detected - confirming attendance", student.name));

    let delay = state.config().confirmation_delay();
    let ledger = Arc::clone(state.ledger());
    let notifier = state.notifier().clone();
    let student_id = student.id.clone();

    tokio::spawn(async move {
        tokio::select! {
            biased;
            () = token.cancelled() => {
                debug!(student_id = %student_id, "Confirmation cancelled");
            }
            () = tokio::time::sleep(delay) => {
                match ledger.write().await.confirm(&student_id) {
                    Ok(record) => {
                        notifier.success(format!("{} marked {}", record.name, record.status));
                    }
                    Err(e) => warn!(student_id = %student_id, error = %e, "Scheduled confirmation skipped"),
                }
            }
        }
    });

    Ok(Json(CheckInResponse {
        student,
        confirm_after_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
    }))
}

/// Reset the ledger for a new class period.
#[utoipa::path(
    post,
    path = "/api/attendance/reset",
    tag = "attendance",
    operation_id = "resetAttendance",
    summary = "Reset attendance",
    description = "Returns every student to absent and reopens the class \
        period now, restarting the late threshold.",
    responses(
        (status = 200, description = "Ledger reset", body = AttendanceResponse)
    )
)]
pub async fn reset_attendance(State(state): State<SharedState>) -> Json<AttendanceResponse> {
    state.ledger().write().await.reset();
    state.notifier().info("Attendance reset");
    Json(attendance_response(&state).await)
}

/// Download the ledger as CSV.
#[utoipa::path(
    get,
    path = "/api/attendance/export",
    tag = "attendance",
    operation_id = "exportAttendance",
    summary = "Export attendance as CSV",
    description = "Returns a CSV attachment with one row per student: name, \
        roll number, status and arrival time in the configured timezone.",
    responses(
        (status = 200, description = "CSV file", content_type = "text/csv", body = String)
    )
)]
pub async fn export_attendance(State(state): State<SharedState>) -> impl IntoResponse {
    let tz = state.config().timezone();
    let records = state.ledger().read().await.snapshot();
    let csv = export_csv(&records, tz);
    let filename = export_filename(state.clock().now().with_timezone(&tz).date_naive());

    info!(rows = records.len(), filename = %filename, "Attendance exported");
    state.notifier().success("Attendance exported");

    (
        [
            (header::CONTENT_TYPE, CSV_CONTENT_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        csv,
    )
}
