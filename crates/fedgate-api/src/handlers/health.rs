//! Health endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use std::sync::Arc;

use crate::state::AppState;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Ready once the served FederationDomain exists; reports the number of
/// currently-registered upstream providers.
pub async fn readiness(State(state): State<Arc<AppState>>) -> Response {
    match state.domains.get(&state.domain_name).await {
        Ok(Some(_)) => Json(json!({
            "status": "ready",
            "providers": state.registry.provider_count().await,
        }))
        .into_response(),
        _ => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not ready" })),
        )
            .into_response(),
    }
}
