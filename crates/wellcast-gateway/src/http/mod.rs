pub mod health;
pub mod runs;
pub mod schedules;
pub mod servers;
pub mod workers;

use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use tracing::error;
use wellcast_scheduler::SchedulerError;

/// Error half of every handler's return type.
pub type ApiError = (StatusCode, Json<Value>);

/// Map a scheduler-side failure onto a status code and `{"error": ..}` body.
///
/// Broker trouble is the upstream's fault (502); store trouble is ours (500).
pub fn api_error(e: SchedulerError) -> ApiError {
    let status = match &e {
        SchedulerError::ScheduleNotFound { .. } => StatusCode::NOT_FOUND,
        SchedulerError::MalformedSchedule { .. } => StatusCode::BAD_REQUEST,
        SchedulerError::Broker(_) => StatusCode::BAD_GATEWAY,
        SchedulerError::Database(_) | SchedulerError::InvalidTimezone(_) => {
            error!(error = %e, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({ "error": e.to_string() })))
}
