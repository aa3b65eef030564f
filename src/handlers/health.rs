use crate::{db, AppState};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

/// Creates the router for health endpoints
pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}

/// Liveness plus a database reachability probe.
async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    match db::ping(&state.db).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "database": "reachable" })),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Health check failed to reach database");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "database": "unreachable" })),
            )
                .into_response()
        }
    }
}
