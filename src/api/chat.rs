//! `POST /v1/chat/completions` — the chat API's only inference endpoint.
//!
//! Thin HTTP layer: all routing/fallback logic lives in
//! [`crate::orchestrator::RequestOrchestrator`]. This handler only resolves
//! which configured primary/fallback ids apply (text vs. vision) and
//! translates the result to an HTTP response.

use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::Value;

use crate::{
    client::{ChatRequest, ChatResponse},
    error::AppError,
    state::AppState,
};

pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let vision = wants_vision(&body);
    let defaults = &state.config.agents.defaults;

    let (primary, fallbacks): (Option<&str>, &[String]) = if vision {
        let primary = defaults.image_model.as_ref().and_then(|m| m.primary.as_deref());
        (primary, &[])
    } else {
        (defaults.model.primary.as_deref(), defaults.model.fallbacks.as_slice())
    };

    let response = state.orchestrator.dispatch(body, vision, primary, fallbacks).await?;
    Ok(Json(response))
}

/// A request wants the vision-capable endpoint if any message carries an
/// OpenAI-style multimodal content array with an `image_url` part.
fn wants_vision(request: &ChatRequest) -> bool {
    request.messages.iter().any(|m| match &m.content {
        Value::Array(parts) => parts.iter().any(|p| p.get("type").and_then(Value::as_str) == Some("image_url")),
        _ => false,
    })
}
