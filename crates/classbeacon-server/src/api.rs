//! HTTP API routes and handlers.
//!
//! - `session` - session start/stop and elapsed time
//! - `devices` - scanning and the discovered-device registry
//! - `bluetooth` - capability probe and demo connection
//! - `attendance` - ledger, check-in flow and CSV export
//! - `notifications` - recent user-facing notifications
//! - `health` - service health checks
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::SharedState;

pub mod attendance;
pub mod bluetooth;
pub mod devices;
pub mod error;
pub mod health;
pub mod notifications;
pub mod openapi;
pub mod session;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// ```text
/// /health                  - Health check
/// /docs                    - Swagger UI
/// /api
/// ├── /session             - Session state, start, stop
/// ├── /devices             - Registry, sightings, scan
/// ├── /bluetooth           - Capability, demo connection
/// ├── /attendance          - Records, stats, check-in, export
/// ├── /notifications       - Recent notifications
/// └── /openapi.json        - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .route("/openapi.json", get(openapi::get_openapi_spec))
                .nest("/session", session::router())
                .nest("/devices", devices::router())
                .nest("/bluetooth", bluetooth::router())
                .nest("/attendance", attendance::router())
                .nest("/notifications", notifications::router()),
        )
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
}
