use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde_json::json;
use wellcast_core::config::AuthMode;

use crate::app::AppState;
use crate::http::ApiError;

/// Check the `Authorization: Bearer <token>` header against the configured token.
pub fn check_auth(state: &AppState, headers: &HeaderMap) -> bool {
    match &state.config.gateway.auth.mode {
        AuthMode::None => true,
        AuthMode::Token => {
            let expected = match &state.config.gateway.auth.token {
                Some(t) => t.as_str(),
                // Token mode configured but no token value, deny.
                None => return false,
            };
            extract_bearer(headers)
                .map(|t| t == expected)
                .unwrap_or(false)
        }
    }
}

/// [`check_auth`] as an early-return guard for handlers.
pub fn require_auth(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    if check_auth(state, headers) {
        return Ok(());
    }
    Err((
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": "Unauthorized. Set 'Authorization: Bearer <your-token>' header."
        })),
    ))
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}
