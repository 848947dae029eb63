use axum::{
    extract::State,
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use wellcast_scheduler::{NewServer, Server};

use super::{api_error, ApiError};
use crate::app::AppState;
use crate::auth::require_auth;

/// GET /servers/
pub async fn list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Server>>, ApiError> {
    require_auth(&state, &headers)?;
    Ok(Json(state.store().servers().map_err(api_error)?))
}

/// POST /servers/: register a server, or update its flags by name.
pub async fn register(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<NewServer>,
) -> Result<Json<Server>, ApiError> {
    require_auth(&state, &headers)?;
    Ok(Json(
        state
            .store()
            .upsert_server(&body, Utc::now())
            .map_err(api_error)?,
    ))
}
