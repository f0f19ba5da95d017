//! `GET /sessions` and `POST /sessions/{id}/terminate` — session control surface.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::state::AppState;

pub async fn list_sessions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "sessions": state.sessions.list() }))
}

pub async fn terminate_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    if state.sessions.terminate(&id) {
        (StatusCode::OK, Json(json!({ "success": true }))).into_response()
    } else {
        (StatusCode::NOT_FOUND, Json(json!({ "success": false }))).into_response()
    }
}
