use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use wellcast_scheduler::{Run, RunReport};

use super::{api_error, ApiError};
use crate::app::AppState;
use crate::auth::require_auth;

#[derive(Deserialize)]
pub struct RunQuery {
    pub workflow_id: Option<i64>,
}

/// GET /workflows/runs/?workflow_id=: newest first.
pub async fn list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<RunQuery>,
) -> Result<Json<Vec<Run>>, ApiError> {
    require_auth(&state, &headers)?;
    Ok(Json(state.ledger().list(query.workflow_id).map_err(api_error)?))
}

/// PATCH /workflows/runs/{task_id}/: progress or completion report from a worker.
pub async fn report(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
    Json(body): Json<RunReport>,
) -> Result<Json<Value>, ApiError> {
    require_auth(&state, &headers)?;
    let updated = state
        .ledger()
        .report(&task_id, &body, Utc::now())
        .map_err(api_error)?;
    if updated == 0 {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("No run for task {task_id}") })),
        ));
    }
    Ok(Json(json!({
        "task_id": task_id,
        "status": body.status,
        "updated": updated,
    })))
}
