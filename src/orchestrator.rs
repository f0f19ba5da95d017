//! Request Orchestrator — ties the router, health tracker, and upstream
//! client together into one bounded attempt loop per inbound chat request.

use std::{collections::HashSet, sync::Arc};

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    client::{ChatRequest, ChatResponse, UpstreamClient},
    error::{AppError, ErrorKind},
    health::HealthTracker,
    pool::ModelPool,
    router::{FallbackRouter, RouteSpec},
};

pub struct RequestOrchestrator {
    pool: Arc<ModelPool>,
    tracker: Arc<HealthTracker>,
    router: Arc<FallbackRouter>,
    client: Arc<UpstreamClient>,
}

impl RequestOrchestrator {
    pub fn new(
        pool: Arc<ModelPool>,
        tracker: Arc<HealthTracker>,
        router: Arc<FallbackRouter>,
        client: Arc<UpstreamClient>,
    ) -> Self {
        Self { pool, tracker, router, client }
    }

    /// Run one request to completion.
    ///
    /// `fallbacks` bounds the number of attempts at `1 + fallbacks.len()`;
    /// the router is asked fresh after every failure, excluding endpoints
    /// already tried, so no endpoint is attempted twice in one call. An
    /// `Auth` or `InvalidResponse` failure on a user-pinned endpoint
    /// (`primary` set, `fallbacks` empty) propagates immediately instead of
    /// looping back to the router.
    #[instrument(skip(self, request, fallbacks), fields(request_id = %Uuid::new_v4()))]
    pub async fn dispatch(
        &self,
        request: ChatRequest,
        vision: bool,
        primary: Option<&str>,
        fallbacks: &[String],
    ) -> Result<ChatResponse, AppError> {
        let max_attempts = 1 + fallbacks.len();
        let route = RouteSpec { primary, fallbacks };
        let user_pinned = primary.is_some() && fallbacks.is_empty();

        let mut excluded: HashSet<String> = HashSet::new();
        let mut last_err: Option<ErrorKind> = None;

        for attempt in 0..max_attempts.max(1) {
            let Some(endpoint) = self.router.select(&self.pool, &self.tracker, vision, route, &excluded) else {
                if attempt == 0 {
                    return Err(AppError::with_kind(
                        anyhow::anyhow!("no available models for this request"),
                        ErrorKind::NoAvailableModels,
                    ));
                }
                break;
            };

            let mut req = request.clone();
            req.model = endpoint.id.clone();

            info!(endpoint = %endpoint.id, attempt, "dispatching chat request");

            match self.client.send(endpoint, req).await {
                Ok((mut response, latency)) => {
                    self.tracker.record_success(&endpoint.id, latency);
                    response.model = endpoint.id.clone();
                    return Ok(response);
                }
                Err(kind) => {
                    warn!(endpoint = %endpoint.id, attempt, ?kind, "upstream attempt failed");
                    self.tracker.record_failure(&endpoint.id, kind);
                    excluded.insert(endpoint.id.clone());
                    last_err = Some(kind);

                    let pinned_terminal =
                        user_pinned && matches!(kind, ErrorKind::Auth | ErrorKind::InvalidResponse);
                    if pinned_terminal {
                        break;
                    }
                }
            }
        }

        let kind = last_err.unwrap_or(ErrorKind::NoAvailableModels);
        Err(AppError::with_kind(anyhow::anyhow!("{kind}"), kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        client::ChatMessage,
        pool::{default_catalog, ModelPool},
        router::RouterStrategy,
    };
    use serde_json::Value;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn request() -> ChatRequest {
        ChatRequest {
            model: "whatever".into(),
            messages: vec![ChatMessage { role: "user".into(), content: Value::String("hi".into()) }],
            temperature: None,
            max_tokens: None,
            stream: None,
            tool_choice: None,
            extra: Default::default(),
        }
    }

    #[tokio::test]
    async fn no_available_models_when_candidate_set_is_empty() {
        let mut catalog = default_catalog();
        for ep in catalog.iter_mut() {
            ep.capabilities.vision = false; // no endpoint serves vision requests
        }
        let pool = Arc::new(ModelPool::new(catalog));
        let tracker = Arc::new(HealthTracker::new());
        let router = Arc::new(FallbackRouter::new(RouterStrategy::HealthAware));
        let client = Arc::new(UpstreamClient::new("sk-test").unwrap());
        let orch = RequestOrchestrator::new(pool, tracker, router, client);

        let err = orch.dispatch(request(), true, None, &[]).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NoAvailableModels));
    }

    #[tokio::test]
    async fn falls_back_to_the_next_endpoint_on_server_error() {
        let failing = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&failing)
            .await;

        let healthy = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-ok",
                "model": "ignored",
                "choices": [],
            })))
            .mount(&healthy)
            .await;

        let mut catalog = default_catalog();
        catalog[0].base_url = failing.uri();
        catalog[1].base_url = healthy.uri();

        let pool = Arc::new(ModelPool::new(catalog));
        let tracker = Arc::new(HealthTracker::new());
        let router = Arc::new(FallbackRouter::new(RouterStrategy::PriorityOnly));
        let client = Arc::new(UpstreamClient::new("sk-test").unwrap());
        let orch = RequestOrchestrator::new(pool, tracker.clone(), router, client);

        let fallbacks = vec!["nvidia-nim/z-ai/glm4.7".to_string()];
        let response = orch.dispatch(request(), false, Some("nvidia-nim/qwen/qwen3.5-397b-a17b"), &fallbacks)
            .await
            .unwrap();
        assert_eq!(response.id, "chatcmpl-ok");
        assert!(tracker.snapshot("nvidia-nim/qwen/qwen3.5-397b-a17b").unwrap().failure >= 1);
    }

    #[tokio::test]
    async fn auth_failure_on_pinned_endpoint_with_no_fallbacks_propagates_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let mut catalog = default_catalog();
        for ep in catalog.iter_mut() {
            ep.base_url = server.uri();
        }

        let pool = Arc::new(ModelPool::new(catalog));
        let tracker = Arc::new(HealthTracker::new());
        let router = Arc::new(FallbackRouter::new(RouterStrategy::PriorityOnly));
        let client = Arc::new(UpstreamClient::new("sk-test").unwrap());
        let orch = RequestOrchestrator::new(pool, tracker.clone(), router, client);

        let err = orch
            .dispatch(request(), false, Some("nvidia-nim/qwen/qwen3.5-397b-a17b"), &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Auth));
        // Only the pinned endpoint was attempted, not the rest of the catalog.
        assert_eq!(tracker.snapshot("nvidia-nim/qwen/qwen3.5-397b-a17b").unwrap().failure, 1);
        assert!(tracker.snapshot("nvidia-nim/z-ai/glm4.7").is_none());
    }

    #[tokio::test]
    async fn auth_failure_with_fallbacks_still_falls_back() {
        let failing = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&failing)
            .await;

        let healthy = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-ok",
                "model": "ignored",
                "choices": [],
            })))
            .mount(&healthy)
            .await;

        let mut catalog = default_catalog();
        catalog[0].base_url = failing.uri();
        catalog[1].base_url = healthy.uri();

        let pool = Arc::new(ModelPool::new(catalog));
        let tracker = Arc::new(HealthTracker::new());
        let router = Arc::new(FallbackRouter::new(RouterStrategy::PriorityOnly));
        let client = Arc::new(UpstreamClient::new("sk-test").unwrap());
        let orch = RequestOrchestrator::new(pool, tracker, router, client);

        let fallbacks = vec!["nvidia-nim/z-ai/glm4.7".to_string()];
        let response = orch
            .dispatch(request(), false, Some("nvidia-nim/qwen/qwen3.5-397b-a17b"), &fallbacks)
            .await
            .unwrap();
        assert_eq!(response.id, "chatcmpl-ok");
    }
}
