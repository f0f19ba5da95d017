//! The chat API — one axum router covering every external HTTP surface.

pub mod auth;
pub mod chat;
pub mod health;
pub mod metrics;
pub mod rate_limit;
pub mod request_id;
pub mod sessions;
pub mod status;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

/// Build the full router. `/health` is unauthenticated and unrated; every
/// other route requires a matching `X-Auth-Token` and is subject to the
/// per-token sliding-window rate limit.
pub fn router(state: Arc<AppState>) -> Router {
    let limiter = Arc::new(rate_limit::RateLimiter::new());

    let authenticated = Router::new()
        .route("/status", get(status::status))
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/sessions", get(sessions::list_sessions))
        .route("/sessions/{id}/terminate", post(sessions::terminate_session))
        .route("/metrics", get(metrics::metrics))
        .layer(axum::middleware::from_fn_with_state(limiter, rate_limit::rate_limit_middleware))
        .layer(axum::middleware::from_fn_with_state(Arc::clone(&state), auth::auth_middleware));

    Router::new()
        .route("/health", get(health::health))
        .merge(authenticated)
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO))
                .on_response(tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO)),
        )
        .with_state(state)
}
