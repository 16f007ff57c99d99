//! Recent notifications.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use classbeacon_core::Notification;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::SharedState;

/// Creates the notifications router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(list_notifications))
}

/// Notification history.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NotificationsResponse {
    /// Oldest first.
    pub notifications: Vec<Notification>,
}

/// List recent notifications.
#[utoipa::path(
    get,
    path = "/api/notifications",
    tag = "system",
    operation_id = "listNotifications",
    summary = "List recent notifications",
    description = "Returns the most recent user-facing notifications: session \
        transitions, scan progress, connection outcomes and errors.",
    responses(
        (status = 200, description = "Recent notifications", body = NotificationsResponse)
    )
)]
pub async fn list_notifications(State(state): State<SharedState>) -> Json<NotificationsResponse> {
    Json(NotificationsResponse {
        notifications: state.notifier().recent(),
    })
}
