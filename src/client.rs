//! Upstream Client — a single HTTP client that speaks OpenAI-compatible
//! chat completions against any [`crate::pool::ModelEndpoint`].

use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{classify_status, ErrorKind},
    pool::{Dialect, ModelEndpoint},
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RESPONSE_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatResponse {
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

pub struct UpstreamClient {
    http: Client,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(api_key: impl Into<String>) -> anyhow::Result<Self> {
        Self::with_timeout(api_key, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(api_key: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let api_key = api_key.into();
        let mut headers = reqwest::header::HeaderMap::new();
        let mut auth = reqwest::header::HeaderValue::from_str(&format!("Bearer {api_key}"))?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        let http = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self { http, timeout })
    }

    /// Send a chat completion request to `endpoint`, enforcing the overall
    /// deadline across connect/send/receive and capping the response body at
    /// [`MAX_RESPONSE_BYTES`].
    ///
    /// Returns the decoded response and the measured round-trip latency on
    /// success; classifies failures into an [`ErrorKind`] so the caller
    /// never has to inspect status codes or error strings itself.
    pub async fn send(
        &self,
        endpoint: &ModelEndpoint,
        mut request: ChatRequest,
    ) -> Result<(ChatResponse, Duration), ErrorKind> {
        if endpoint.dialect == Dialect::Custom && request.tool_choice.is_none() {
            request.extra.remove("tool_choice");
        }

        let url = format!("{}/v1/chat/completions", endpoint.base_url.trim_end_matches('/'));
        let started = Instant::now();

        let result = tokio::time::timeout(self.timeout, self.http.post(&url).json(&request).send()).await;

        let response = match result {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                return Err(if e.is_timeout() {
                    ErrorKind::Timeout
                } else if e.is_connect() {
                    ErrorKind::Network
                } else {
                    ErrorKind::Network
                });
            }
            Err(_) => return Err(ErrorKind::Timeout),
        };

        let status = response.status();
        if status != StatusCode::OK {
            return Err(classify_status(status));
        }

        if let Some(len) = response.content_length() {
            if len > MAX_RESPONSE_BYTES {
                return Err(ErrorKind::InvalidResponse);
            }
        }

        let body = match tokio::time::timeout(self.timeout, response.bytes()).await {
            Ok(Ok(b)) if b.len() as u64 <= MAX_RESPONSE_BYTES => b,
            Ok(Ok(_)) => return Err(ErrorKind::InvalidResponse),
            Ok(Err(_)) => return Err(ErrorKind::Network),
            Err(_) => return Err(ErrorKind::Timeout),
        };

        let latency = started.elapsed();
        let parsed: ChatResponse = serde_json::from_slice(&body).map_err(|_| ErrorKind::InvalidResponse)?;
        Ok((parsed, latency))
    }
}
