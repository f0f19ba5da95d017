//! Liveness probe endpoint. Unauthenticated, no dependencies, never blocks.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// `GET /health` — always returns 200 OK with `{"status":"healthy"}`.
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}
