//! Worker pool introspection and per-task cancellation.
//!
//! `GET /workflows/workers-status/` never fails on broker trouble; every
//! part of the snapshot degrades on its own.
//!
//! `DELETE /workflows/task/{task_id}/?queue=<name>&revoke=<0|1>` removes a
//! pending message (default queue `workflows`) or, with `revoke`, asks the
//! workers to terminate the task.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use wellcast_broker::WorkersStatus;
use wellcast_core::config::WORKFLOWS_QUEUE;
use wellcast_scheduler::CancelAction;

use super::{api_error, ApiError};
use crate::app::AppState;
use crate::auth::require_auth;

pub async fn workers_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<WorkersStatus>, ApiError> {
    require_auth(&state, &headers)?;
    Ok(Json(state.inspector.status().await))
}

#[derive(Deserialize)]
pub struct CancelQuery {
    #[serde(default = "default_queue")]
    pub queue: String,
    #[serde(default)]
    pub revoke: Option<String>,
}

fn default_queue() -> String {
    WORKFLOWS_QUEUE.to_string()
}

impl CancelQuery {
    /// `revoke=1`, `revoke=true`, or a bare `revoke` all count.
    fn wants_revoke(&self) -> bool {
        match self.revoke.as_deref() {
            None => false,
            Some(v) => !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no"),
        }
    }
}

pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
    Query(query): Query<CancelQuery>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    require_auth(&state, &headers)?;
    let outcome = state
        .tasks
        .cancel(&task_id, &query.queue, query.wants_revoke())
        .await
        .map_err(api_error)?;

    let mut body = json!({
        "task_id": task_id,
        "queue": query.queue,
        "action": outcome.action,
    });
    let status = match outcome.action {
        CancelAction::Deleted => {
            body["db_status"] = json!("REMOVED");
            StatusCode::OK
        }
        CancelAction::Revoked => StatusCode::OK,
        CancelAction::NotFound => StatusCode::NOT_FOUND,
    };
    Ok((status, Json(body)))
}
