//! Session lifecycle endpoints.
//!
//! Starting a session spawns its elapsed-time ticker and, for teachers,
//! begins broadcasting the class beacon. Stopping cancels everything that
//! was started under the session.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use classbeacon_core::{spawn_ticker, BeaconAdvert, SessionRole, SessionSnapshot};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the session router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_session))
        .route("/start", post(start_session))
        .route("/stop", post(stop_session))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Start session request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "role": "teacher" }))]
pub struct StartSessionRequest {
    /// Whether this device broadcasts (`teacher`) or scans (`student`).
    #[serde(default)]
    pub role: SessionRole,
}

/// Stop session response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StopSessionResponse {
    /// State just before the stop, so the final duration is not lost.
    pub final_state: SessionSnapshot,

    /// State after the stop.
    pub session: SessionSnapshot,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the current session state.
#[utoipa::path(
    get,
    path = "/api/session",
    tag = "session",
    operation_id = "getSession",
    summary = "Get session state",
    description = "Returns whether a session is active, its role, class code \
        and elapsed time.",
    responses(
        (status = 200, description = "Current session", body = SessionSnapshot)
    )
)]
pub async fn get_session(State(state): State<SharedState>) -> Json<SessionSnapshot> {
    Json(state.session().read().await.snapshot())
}

/// Start a session.
#[utoipa::path(
    post,
    path = "/api/session/start",
    tag = "session",
    operation_id = "startSession",
    summary = "Start a session",
    description = "Starts a teacher or student session with a fresh class code. \
        Teacher sessions also begin broadcasting the beacon and open a new \
        class period for the late threshold. Fails with 409 if a session is \
        already running.",
    request_body = StartSessionRequest,
    responses(
        (status = 200, description = "Session started", body = SessionSnapshot),
        (status = 409, description = "A session is already active", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn start_session(
    State(state): State<SharedState>,
    Json(request): Json<StartSessionRequest>,
) -> ApiResult<Json<SessionSnapshot>> {
    let (snapshot, token) = {
        let mut session = state.session().write().await;
        let snapshot = session.start(request.role).map_err(|e| state.report(e))?;
        let (_, token) = session.scope().map_err(|e| state.report(e))?;
        (snapshot, token)
    };

    if let Some(session_id) = snapshot.session_id {
        spawn_ticker(
            state.session().clone(),
            session_id,
            state.config().tick_interval(),
            token,
        );
    }

    if request.role == SessionRole::Teacher {
        state.ledger().write().await.reopen();

        if let Some(class_code) = snapshot.class_code.clone() {
            let advert = BeaconAdvert {
                service_uuid: state.config().service_uuid(),
                class_code,
            };
            // The session stays up without a broadcast; the class code is
            // still shown for manual entry.
            if let Err(e) = state.radio().advertise(&advert).await {
                warn!(error = %e, "Beacon broadcast unavailable");
                state.notifier().error(e.to_string());
            }
        }
    }

    Ok(Json(snapshot))
}

/// Stop the running session.
#[utoipa::path(
    post,
    path = "/api/session/stop",
    tag = "session",
    operation_id = "stopSession",
    summary = "Stop the session",
    description = "Stops the running session, its timer, any in-flight scan and \
        any pending confirmation. Fails with 409 if no session is running.",
    responses(
        (status = 200, description = "Session stopped", body = StopSessionResponse),
        (status = 409, description = "No session is active", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn stop_session(State(state): State<SharedState>) -> ApiResult<Json<StopSessionResponse>> {
    let (final_state, session) = {
        let mut session = state.session().write().await;
        let final_state = session.stop().map_err(|e| state.report(e))?;
        (final_state, session.snapshot())
    };

    if final_state.role == Some(SessionRole::Teacher) {
        if let Err(e) = state.radio().stop_advertising().await {
            warn!(error = %e, "Failed to stop beacon broadcast");
        }
    }

    Ok(Json(StopSessionResponse {
        final_state,
        session,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_request_defaults_to_teacher() {
        let request: StartSessionRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request.role, SessionRole::Teacher);

        let request: StartSessionRequest =
            serde_json::from_str(r#"{"role":"student"}"#).unwrap();
        assert_eq!(request.role, SessionRole::Student);
    }
}
