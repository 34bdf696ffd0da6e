use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use tracing::warn;

use crate::api_state::ApiState;

/// Liveness: the process is up. Deliberately touches nothing else, so a
/// corpus outage never restarts the service.
pub async fn live() -> Json<Value> {
    Json(json!({ "alive": true }))
}

/// Readiness: the corpus store must answer before this instance accepts
/// traffic. The failure cause goes to the log, not to the caller.
pub async fn ready(State(state): State<ApiState>) -> (StatusCode, Json<Value>) {
    match state.db.client.query("RETURN 1").await {
        Ok(_) => (StatusCode::OK, Json(json!({ "ready": true }))),
        Err(e) => {
            warn!(error = %e, "Readiness check failed: corpus store unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "ready": false, "reason": "corpus store unreachable" })),
            )
        }
    }
}
