use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use crate::app::AppState;

/// GET /health: liveness check, returns server metadata and broker reachability.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let broker = match state.broker.ensure_connected().await {
        Ok(()) => "connected",
        Err(e) => {
            warn!(error = %e, "health check: broker unreachable");
            "unreachable"
        }
    };
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "broker": broker,
    }))
}
