//! Types shared between the core library and the HTTP surface.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Liveness report.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Always `ok` while the process is serving.
    #[schema(example = "ok")]
    pub status: String,

    /// Crate version.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Seconds since the process started.
    #[schema(example = 3600)]
    pub uptime_secs: u64,

    /// Whether a session is running.
    pub session_active: bool,

    /// Radio backend in use (`bluez` or `mock`).
    #[schema(example = "mock")]
    pub radio_backend: String,
}
