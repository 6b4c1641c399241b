//! Health check handlers

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::core::shared::state::AppState;

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let providers = state.providers.provider_ids();
    let status = if providers.is_empty() { "degraded" } else { "healthy" };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": status,
            "service": "leitor-docs",
            "version": env!("CARGO_PKG_VERSION"),
            "providers": providers
        })),
    )
}

pub async fn health_check_simple() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "service": "leitor-docs",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}
