//! Error taxonomy and the unified HTTP error type for axum handlers.
//!
//! [`ErrorKind`] is the classification the Health Tracker, Fallback Router,
//! and Request Orchestrator reason about — they switch on kind, never on
//! message text. [`AppError`] wraps an [`anyhow::Error`] plus an optional
//! [`ErrorKind`] so any handler can return `Result<T, AppError>` and
//! propagate with `?`, rendering an OpenAI-shaped error body
//! (`{"error":{"message","type"}}`).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Classification of an upstream or pipeline failure.
///
/// Covers both the kinds a caller sees propagated to them and the kinds
/// only ever observed internally as cooldown triggers (`ServerError`,
/// `Unknown`) — both are real wire-level outcomes, so both get variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("network error")]
    Network,
    #[error("request timed out")]
    Timeout,
    #[error("authentication failed")]
    Auth,
    #[error("rate limited")]
    RateLimit,
    #[error("upstream server error")]
    ServerError,
    #[error("invalid response from upstream")]
    InvalidResponse,
    #[error("unknown error")]
    Unknown,
    #[error("no available models")]
    NoAvailableModels,
    #[error("media exceeds the configured size limit")]
    MediaTooLarge,
    #[error("retries exhausted")]
    MaxRetriesExceeded,
    #[error("duplicate message")]
    Duplicate,
    #[error("access denied")]
    AccessDenied,
}

impl ErrorKind {
    /// Cooldown duration an endpoint is placed under after a failure of this kind.
    ///
    /// Only meaningful for the upstream-facing kinds; pipeline-level kinds
    /// (`NoAvailableModels`, `MediaTooLarge`, …) never reach
    /// [`crate::health::HealthTracker::record_failure`] and the 30s fallback
    /// here is never observed in practice.
    pub fn cooldown(self) -> std::time::Duration {
        use std::time::Duration;
        match self {
            ErrorKind::RateLimit => Duration::from_secs(600),
            ErrorKind::Auth => Duration::from_secs(300),
            ErrorKind::Timeout => Duration::from_secs(120),
            ErrorKind::ServerError => Duration::from_secs(60),
            ErrorKind::Network => Duration::from_secs(60),
            ErrorKind::InvalidResponse => Duration::from_secs(30),
            ErrorKind::Unknown => Duration::from_secs(30),
            ErrorKind::NoAvailableModels
            | ErrorKind::MediaTooLarge
            | ErrorKind::MaxRetriesExceeded
            | ErrorKind::Duplicate
            | ErrorKind::AccessDenied => Duration::from_secs(30),
        }
    }

    /// Whether a failure of this kind should be retried against a fallback
    /// endpoint by the orchestrator, absent the user-pinned-endpoint
    /// exception handled separately in `orchestrator.rs`.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Network
                | ErrorKind::Timeout
                | ErrorKind::RateLimit
                | ErrorKind::ServerError
                | ErrorKind::Auth
                | ErrorKind::InvalidResponse
                | ErrorKind::Unknown
        )
    }
}

/// Classify an HTTP status code into an [`ErrorKind`].
pub fn classify_status(status: reqwest::StatusCode) -> ErrorKind {
    match status.as_u16() {
        401 | 403 => ErrorKind::Auth,
        429 => ErrorKind::RateLimit,
        500..=599 => ErrorKind::ServerError,
        _ => ErrorKind::InvalidResponse,
    }
}

/// Wraps [`anyhow::Error`] plus an optional [`ErrorKind`] so it can be
/// returned from axum handlers.
///
/// Any type that implements `Into<anyhow::Error>` converts via the blanket
/// [`From`] implementation with `kind = None`; call sites that already know
/// the kind should build an `AppError` directly via [`AppError::with_kind`].
#[derive(Debug)]
pub struct AppError {
    source: anyhow::Error,
    kind: Option<ErrorKind>,
}

impl AppError {
    /// Attach a known [`ErrorKind`] to an error, for accurate HTTP status mapping.
    pub fn with_kind(source: anyhow::Error, kind: ErrorKind) -> Self {
        Self { source, kind: Some(kind) }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        self.kind
    }

    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self.kind {
            Some(ErrorKind::NoAvailableModels) => (StatusCode::SERVICE_UNAVAILABLE, "no_available_models"),
            Some(ErrorKind::Auth) => (StatusCode::BAD_GATEWAY, "authentication_error"),
            Some(ErrorKind::RateLimit) => (StatusCode::TOO_MANY_REQUESTS, "rate_limit_error"),
            Some(ErrorKind::Timeout) => (StatusCode::GATEWAY_TIMEOUT, "timeout_error"),
            Some(ErrorKind::InvalidResponse) | Some(ErrorKind::ServerError) => {
                (StatusCode::BAD_GATEWAY, "invalid_response_error")
            }
            Some(ErrorKind::Network) => (StatusCode::BAD_GATEWAY, "network_error"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self.source, kind = ?self.kind, "handler error");
        let (status, error_type) = self.status_and_type();
        (
            status,
            Json(json!({
                "error": {
                    "message": self.source.to_string(),
                    "type": error_type,
                }
            })),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(e: E) -> Self {
        Self { source: e.into(), kind: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_cools_down_for_ten_minutes() {
        assert_eq!(ErrorKind::RateLimit.cooldown(), std::time::Duration::from_secs(600));
    }

    #[test]
    fn server_error_cools_down_for_one_minute() {
        assert_eq!(ErrorKind::ServerError.cooldown(), std::time::Duration::from_secs(60));
    }

    #[test]
    fn classify_status_maps_known_codes() {
        assert_eq!(classify_status(reqwest::StatusCode::UNAUTHORIZED), ErrorKind::Auth);
        assert_eq!(classify_status(reqwest::StatusCode::FORBIDDEN), ErrorKind::Auth);
        assert_eq!(classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS), ErrorKind::RateLimit);
        assert_eq!(classify_status(reqwest::StatusCode::BAD_GATEWAY), ErrorKind::ServerError);
        assert_eq!(classify_status(reqwest::StatusCode::NOT_FOUND), ErrorKind::InvalidResponse);
    }

    #[test]
    fn network_and_timeout_are_retryable_but_no_available_models_is_not() {
        assert!(ErrorKind::Network.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::NoAvailableModels.is_retryable());
        assert!(!ErrorKind::Duplicate.is_retryable());
    }
}
