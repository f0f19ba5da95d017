//! Token authentication middleware.
//!
//! Every route except `/health` requires `X-Auth-Token: <40-hex token>` to
//! match the gateway's configured (or auto-generated) main token.
//!
//! # Security note
//! The token is compared with `==`. This is intentionally not a
//! constant-time comparison: the token is opaque, unguessable, and never
//! echoed back on failure, so a timing side-channel here buys an attacker
//! nothing a handful of failed-auth log lines wouldn't already reveal.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::state::AppState;

pub async fn auth_middleware(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let provided = req.headers().get("x-auth-token").and_then(|v| v.to_str().ok());

    match provided {
        Some(token) if token == state.auth_token => next.run(req).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": { "message": "valid X-Auth-Token header required", "type": "authentication_error" } })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request as HttpRequest, middleware, routing::get, Router};
    use tower::ServiceExt;

    fn test_state(token: &str) -> AppState {
        use crate::{
            channel::ChannelConfig,
            client::UpstreamClient,
            config::*,
            pool::{default_catalog, ModelPool},
            router::{FallbackRouter, RouterStrategy},
            session::SessionStore,
        };

        let config = Config {
            env: EnvConfig { nvidia_api_key: Some("test".into()) },
            agents: AgentsConfig {
                defaults: AgentDefaults {
                    model: ModelChoice { primary: None, fallbacks: vec![] },
                    image_model: None,
                },
            },
            gateway: GatewayConfig { port: 18789, bind: BindMode::Loopback, mode: "standard".into(), auth_token: None },
            whatsapp: serde_json::from_str::<ChannelConfig>(
                r#"{"dmPolicy":"open","groupPolicy":"open","mediaMaxMb":16,"debounceMs":0}"#,
            )
            .unwrap(),
            max_concurrent: 8,
        };
        let pool = Arc::new(ModelPool::new(default_catalog()));
        let router = Arc::new(FallbackRouter::new(RouterStrategy::HealthAware));
        let client = Arc::new(UpstreamClient::new("test").unwrap());
        let dir = tempfile::tempdir().unwrap();
        let sessions = Arc::new(SessionStore::load(dir.path().join("sessions.json")).unwrap());
        AppState::new(Arc::new(config), pool, router, client, sessions, token.to_string())
    }

    fn app(token: &str) -> Router {
        let state = Arc::new(test_state(token));
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
            .with_state(state)
    }

    #[tokio::test]
    async fn missing_token_returns_401() {
        let resp = app("secret-token").oneshot(HttpRequest::get("/").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn matching_token_passes_through() {
        let resp = app("secret-token")
            .oneshot(HttpRequest::get("/").header("x-auth-token", "secret-token").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn wrong_token_returns_401() {
        let resp = app("secret-token")
            .oneshot(HttpRequest::get("/").header("x-auth-token", "wrong").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
