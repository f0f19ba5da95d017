//! Per-token sliding-window rate limiting middleware.
//!
//! Each auth token is allowed 100 requests per 60-second sliding window.
//! Over-limit responses carry `429` and the OpenAI-shaped rate-limit error
//! body.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::Mutex;

const WINDOW: Duration = Duration::from_secs(60);
const LIMIT: usize = 100;

/// Sliding-window request log, one per token.
pub struct RateLimiter {
    windows: DashMap<String, Mutex<Vec<Instant>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self { windows: DashMap::new() }
    }

    /// Record a request for `token` and report whether it's within the limit.
    pub async fn check(&self, token: &str) -> Result<(), Duration> {
        let entry = self.windows.entry(token.to_string()).or_insert_with(|| Mutex::new(Vec::new()));
        let mut timestamps = entry.lock().await;

        let now = Instant::now();
        timestamps.retain(|t| now.duration_since(*t) < WINDOW);

        if timestamps.len() >= LIMIT {
            let oldest = timestamps[0];
            let retry_after = WINDOW - now.duration_since(oldest);
            return Err(retry_after);
        }

        timestamps.push(now);
        Ok(())
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    let token = req
        .headers()
        .get("x-auth-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_string();

    match limiter.check(&token).await {
        Ok(()) => next.run(req).await,
        Err(retry_after) => (
            StatusCode::TOO_MANY_REQUESTS,
            [("retry-after", retry_after.as_secs().to_string())],
            Json(json!({ "error": { "message": "rate limit exceeded", "type": "rate_limit_error" } })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_up_to_the_limit() {
        let limiter = RateLimiter::new();
        for _ in 0..LIMIT {
            assert!(limiter.check("tok-a").await.is_ok());
        }
        assert!(limiter.check("tok-a").await.is_err());
    }

    #[tokio::test]
    async fn different_tokens_have_independent_windows() {
        let limiter = RateLimiter::new();
        for _ in 0..LIMIT {
            let _ = limiter.check("tok-a").await;
        }
        assert!(limiter.check("tok-b").await.is_ok());
    }

    #[tokio::test]
    async fn error_carries_a_positive_retry_after() {
        let limiter = RateLimiter::new();
        for _ in 0..LIMIT {
            let _ = limiter.check("tok-a").await;
        }
        let retry_after = limiter.check("tok-a").await.unwrap_err();
        assert!(retry_after <= WINDOW);
    }
}
