//! `GET /status` (token-authenticated) — session and traffic summary.

use std::sync::{atomic::Ordering, Arc};

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::{session::SessionStatus, state::AppState};

pub async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let sessions = state.sessions.list();
    let active = sessions.iter().filter(|s| s.effective_status(now_ms()) == SessionStatus::Active).count();
    let total_messages: u64 = sessions.iter().map(|s| s.message_count).sum();

    Json(json!({
        "sessions": {
            "total": sessions.len(),
            "active": active,
        },
        "total_messages": total_messages,
        "websocket_clients": state.websocket_clients.load(Ordering::Relaxed),
    }))
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
