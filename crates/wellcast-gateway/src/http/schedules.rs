//! Schedule administration and the scheduler trigger.
//!
//! - `POST /workflows/run-schedules/`: one runner pass, returns its results
//! - `GET|POST /workflows/schedules/`
//! - `GET|PATCH|DELETE /workflows/schedules/{id}/`
//! - `POST /workflows/schedules/{id}/run_now/`
//! - `GET /workflows/schedule-logs/?scheduler_id=`

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use wellcast_scheduler::{DispatchResult, NewSchedule, Schedule, ScheduleLog, SchedulePatch};

use super::{api_error, ApiError};
use crate::app::AppState;
use crate::auth::require_auth;

/// POST /workflows/run-schedules/: run one scheduler pass synchronously.
pub async fn run_schedules(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<DispatchResult>>, ApiError> {
    require_auth(&state, &headers)?;
    let results = state.runner.run_due().await.map_err(api_error)?;
    Ok(Json(results))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Schedule>>, ApiError> {
    require_auth(&state, &headers)?;
    Ok(Json(state.store().list().map_err(api_error)?))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<NewSchedule>,
) -> Result<(StatusCode, Json<Schedule>), ApiError> {
    require_auth(&state, &headers)?;
    state
        .runner
        .cron()
        .validate(&body.cron_expression)
        .map_err(api_error)?;
    let sched = state.store().create(&body, Utc::now()).map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(sched)))
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Schedule>, ApiError> {
    require_auth(&state, &headers)?;
    Ok(Json(state.store().get(id).map_err(api_error)?))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(patch): Json<SchedulePatch>,
) -> Result<Json<Schedule>, ApiError> {
    require_auth(&state, &headers)?;
    if let Some(expr) = &patch.cron_expression {
        state.runner.cron().validate(expr).map_err(api_error)?;
    }
    Ok(Json(state.store().update(id, &patch).map_err(api_error)?))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    require_auth(&state, &headers)?;
    state.store().delete(id).map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /workflows/schedules/{id}/run_now/: dispatch outside the cron cadence.
pub async fn run_now(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    require_auth(&state, &headers)?;
    let handle = state.runner.run_now(id).await.map_err(api_error)?;
    Ok(Json(json!({
        "status": "QUEUED",
        "task_id": handle.id,
        "queue": handle.queue,
    })))
}

#[derive(Deserialize)]
pub struct LogQuery {
    pub scheduler_id: Option<i64>,
}

pub async fn logs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<LogQuery>,
) -> Result<Json<Vec<ScheduleLog>>, ApiError> {
    require_auth(&state, &headers)?;
    Ok(Json(state.store().logs(query.scheduler_id).map_err(api_error)?))
}
