use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use rand::Rng;
use serde_json::Value;
use tokio::signal;
use tracing::{error, info, warn};

mod api;
mod channel;
mod client;
mod config;
mod error;
mod health;
mod orchestrator;
mod pool;
mod ratelimit;
mod router;
mod session;
mod state;

use channel::{
    access::ChannelAccessControl,
    bridge::{BridgeEvent, MessagingBridge},
    inbound::{InboundPipeline, Outcome},
    outbound::{ChunkSender, OutboundPipeline, SendError},
    InboundMessage,
};
use client::{ChatMessage, ChatRequest, UpstreamClient};
use config::Config;
use pool::ModelPool;
use router::{FallbackRouter, RouterStrategy};
use session::SessionStore;
use state::AppState;

pub use error::AppError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatehand=info,tower_http=warn".into()),
        )
        .init();

    let config_path = std::env::var("GATEHAND_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/gatehand/config.json"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(path = %config_path.display(), error = %e, "configuration failed validation");
            std::process::exit(1);
        }
    };
    let config = Arc::new(config);

    let auth_token = config.gateway.auth_token.clone().unwrap_or_else(generate_auth_token);
    if config.gateway.auth_token.is_none() {
        info!(token = %auth_token, "gateway.authToken not set — generated a token for this run");
    }

    let api_key = config.api_key().expect("validated at config load");
    let pool = Arc::new(ModelPool::new(pool::default_catalog()));
    let client = match UpstreamClient::new(api_key) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!(error = %e, "failed to build upstream client");
            std::process::exit(1);
        }
    };
    let router = Arc::new(FallbackRouter::new(RouterStrategy::default()));

    let state_dir = std::env::var("GATEHAND_STATE_DIR").unwrap_or_else(|_| "/var/lib/gatehand".into());
    if let Err(e) = std::fs::create_dir_all(&state_dir) {
        error!(state_dir, error = %e, "failed to create state directory");
        std::process::exit(1);
    }
    let sessions_path = PathBuf::from(&state_dir).join("sessions.json");
    let sessions = match SessionStore::load(&sessions_path) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(path = %sessions_path.display(), error = %e, "failed to load persisted sessions");
            std::process::exit(1);
        }
    };

    let app_state = Arc::new(AppState::new(
        Arc::clone(&config),
        Arc::clone(&pool),
        Arc::clone(&router),
        Arc::clone(&client),
        Arc::clone(&sessions),
        auth_token,
    ));

    let bind_addr: SocketAddr = config
        .gateway
        .bind
        .to_socket_addr_str(config.gateway.port)
        .parse()
        .context("gateway.bind did not resolve to a socket address")?;
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("binding chat API listener on {bind_addr}"))?;
    info!(%bind_addr, "chat API listening");

    let app = api::router(Arc::clone(&app_state));

    let bridge_handle = spawn_messaging_bridge(Arc::clone(&config), Arc::clone(&app_state), state_dir.clone());

    let sweep_sessions = Arc::clone(&sessions);
    let sweep_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        interval.tick().await;
        loop {
            interval.tick().await;
            sweep_sessions.sweep_terminated();
            if let Err(e) = sweep_sessions.flush() {
                warn!(error = %e, "periodic session flush failed");
            }
        }
    });

    let serve_result = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("shutdown signal received, draining background workers");
    sweep_task.abort();
    if let Some(handle) = bridge_handle {
        handle.abort();
    }
    if let Err(e) = sessions.flush() {
        warn!(error = %e, "final session flush failed");
    }

    match serve_result {
        Ok(()) => {
            info!("graceful shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "chat API server error");
            std::process::exit(2);
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    // Grace period: give in-flight work a chance to finish before the
    // process-wide hard exit that follows server shutdown.
    tokio::time::sleep(Duration::from_secs(10)).await;
}

fn generate_auth_token() -> String {
    let mut rng = rand::thread_rng();
    (0..40).map(|_| std::char::from_digit(rng.gen_range(0..16), 16).unwrap()).collect()
}

/// Wraps a [`MessagingBridge`] handle as an [`OutboundPipeline`] sender.
struct BridgeChunkSender {
    bridge: Arc<MessagingBridge>,
}

#[async_trait::async_trait]
impl ChunkSender for BridgeChunkSender {
    async fn send_chunk(&self, chat_id: &str, text: &str) -> Result<String, SendError> {
        self.bridge
            .send_message(chat_id, text)
            .await
            .map(|v| reply_id(&v))
            .map_err(map_rpc_error)
    }

    async fn send_media(&self, chat_id: &str, path: &str, caption: Option<&str>) -> Result<String, SendError> {
        self.bridge
            .send_media(chat_id, path, caption)
            .await
            .map(|v| reply_id(&v))
            .map_err(map_rpc_error)
    }
}

fn reply_id(result: &Value) -> String {
    result
        .get("messageId")
        .or_else(|| result.get("id"))
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// The bridge reports failures as an opaque `{code, message}` pair, not a
/// transport-level taxonomy — `-32000` (stdin already closed) is treated as
/// terminal, everything else as a transient send failure worth retrying.
fn map_rpc_error(err: channel::bridge::RpcError) -> SendError {
    if err.code == -32000 {
        SendError::Other
    } else {
        SendError::TemporaryFailure
    }
}

/// Spawn the messaging-transport helper named by `GATEHAND_BRIDGE_CMD`
/// (a whitespace-separated program + arguments) and wire its events
/// through the inbound pipeline into the orchestrator, replying through
/// the outbound pipeline.
///
/// `GATEHAND_BRIDGE_CMD` is not a key in the recognized JSON config file —
/// the messaging helper's executable path is host-specific deployment
/// detail, not gateway policy, so it is sourced from the environment like
/// the upstream API key. Unset means "run without a messaging channel";
/// the chat API still serves `/v1/chat/completions` directly.
fn spawn_messaging_bridge(
    config: Arc<Config>,
    state: Arc<AppState>,
    state_dir: String,
) -> Option<tokio::task::JoinHandle<()>> {
    let command = std::env::var("GATEHAND_BRIDGE_CMD").ok()?;
    let mut parts = command.split_whitespace();
    let program = parts.next()?.to_string();
    let args: Vec<String> = parts.map(String::from).collect();

    Some(tokio::spawn(async move {
        let (bridge, mut events) = match MessagingBridge::spawn(&program, &args).await {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, program, "failed to spawn messaging bridge");
                return;
            }
        };
        let bridge = Arc::new(bridge);

        let auth_dir = PathBuf::from(&state_dir).join("whatsapp-auth");
        if let Err(e) = std::fs::create_dir_all(&auth_dir) {
            error!(error = %e, "failed to create messaging bridge auth directory");
            return;
        }
        if let Err(e) = bridge.init(&auth_dir.display().to_string(), true).await {
            error!(error = %e, "messaging bridge init failed");
            return;
        }

        let self_identity = std::env::var("GATEHAND_WHATSAPP_SELF_ID").unwrap_or_default();
        let access = ChannelAccessControl::new(config.whatsapp.clone(), self_identity);
        let inbound = Arc::new(InboundPipeline::new(access, Duration::from_millis(config.whatsapp.debounce_ms)));
        let outbound = Arc::new(OutboundPipeline::new(
            BridgeChunkSender { bridge: Arc::clone(&bridge) },
            config.whatsapp.media_max_mb,
        ));

        // Periodically flush per-sender coalesce queues whose debounce
        // window has elapsed, delivering one combined message per burst.
        {
            let inbound = Arc::clone(&inbound);
            let outbound = Arc::clone(&outbound);
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_millis(100));
                loop {
                    ticker.tick().await;
                    for message in inbound.flush_ready() {
                        handle_delivery(&state, &outbound, message).await;
                    }
                }
            });
        }

        loop {
            match events.recv().await {
                Some(BridgeEvent::Message(raw)) => {
                    let Ok(message) = serde_json::from_value::<InboundMessage>(raw) else {
                        warn!("unparseable inbound message from messaging bridge");
                        continue;
                    };
                    let chat_id = message.chat_id.clone();
                    match inbound.accept(message) {
                        Outcome::Deliver(message) => {
                            handle_delivery(&state, &outbound, message).await;
                        }
                        Outcome::Rejected { reply: Some(text) } => {
                            if let Err(e) = outbound.send(&chat_id, &text).await {
                                warn!(chat_id, ?e, "failed to deliver access-control reply");
                            }
                        }
                        Outcome::Rejected { reply: None } | Outcome::Queued | Outcome::Duplicate => {}
                    }
                }
                Some(BridgeEvent::Connection(info_value)) => {
                    info!(?info_value, "messaging bridge connection event");
                }
                Some(BridgeEvent::Qr(qr)) => {
                    info!(?qr, "messaging bridge QR event — scan to link");
                }
                None => {
                    warn!("messaging bridge event stream closed");
                    break;
                }
            }
        }
    }))
}

async fn handle_delivery(state: &Arc<AppState>, outbound: &Arc<OutboundPipeline<BridgeChunkSender>>, message: InboundMessage) {
    let chat_id = message.chat_id.clone();
    let sender = message.sender.clone();
    let request = ChatRequest {
        model: String::new(),
        messages: vec![ChatMessage { role: "user".into(), content: Value::String(message.body.clone()) }],
        temperature: None,
        max_tokens: None,
        stream: None,
        tool_choice: None,
        extra: Default::default(),
    };

    let defaults = &state.config.agents.defaults;
    let (primary, fallbacks) = (defaults.model.primary.as_deref(), defaults.model.fallbacks.as_slice());

    const CHANNEL: &str = "whatsapp";
    let session_id = format!("{CHANNEL}:{sender}");
    if state.sessions.get(&session_id).is_none() {
        state.sessions.create(&session_id, &sender, CHANNEL);
    }
    state.sessions.touch(&session_id);

    match state.orchestrator.dispatch(request, false, primary, fallbacks).await {
        Ok(response) => {
            let reply_text = response
                .rest
                .get("choices")
                .and_then(Value::as_array)
                .and_then(|c| c.first())
                .and_then(|c| c.get("message"))
                .and_then(|m| m.get("content"))
                .and_then(Value::as_str)
                .unwrap_or("(empty response)")
                .to_string();
            if let Err(e) = outbound.send(&chat_id, &reply_text).await {
                warn!(chat_id, ?e, "failed to deliver reply after retries");
            }
        }
        Err(e) => {
            warn!(chat_id, kind = ?e.kind(), "orchestrator dispatch failed for channel message");
            let _ = outbound.send(&chat_id, "Something went wrong processing that message.").await;
        }
    }
}
