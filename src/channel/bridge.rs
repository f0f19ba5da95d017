//! Messaging Bridge — newline-delimited JSON-RPC 2.0 over a child process's
//! stdin/stdout.
//!
//! The core never assumes the helper is local, single-instance, or
//! long-lived: all interaction goes through this capability, built on
//! [`tokio::process::Command`] and a line-buffered reader task, the same
//! shape as any stdio-transport RPC client.

use std::{
    collections::HashMap,
    process::Stdio,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin},
    sync::{mpsc, oneshot, Mutex},
};
use tracing::{debug, info, warn};

#[derive(Debug, Serialize)]
struct RpcRequest {
    jsonrpc: &'static str,
    id: i64,
    method: String,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    id: Option<i64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
    /// Present instead of `id` on a push notification (`message`, `connection`, `qr`).
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bridge error {}: {}", self.code, self.message)
    }
}
impl std::error::Error for RpcError {}

/// A notification pushed by the bridge outside of any request/response pair.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    Message(Value),
    Connection(Value),
    Qr(Value),
}

type PendingMap = Mutex<HashMap<i64, oneshot::Sender<Result<Value, RpcError>>>>;

/// A running messaging-transport helper process.
///
/// Call/reply methods take `&self` so the handle can be shared behind an
/// `Arc` with senders; the notification stream is handed back separately
/// from [`MessagingBridge::spawn`] as an owned [`mpsc::Receiver`], since
/// draining it requires exclusive access and belongs to one reader task.
pub struct MessagingBridge {
    stdin: Mutex<ChildStdin>,
    pending: Arc<PendingMap>,
    next_id: AtomicI64,
    _child: Child,
}

impl MessagingBridge {
    /// Spawn `program` and start the reader task. The returned receiver
    /// yields `message`/`connection`/`qr` notifications as they arrive.
    pub async fn spawn(program: &str, args: &[String]) -> anyhow::Result<(Self, mpsc::Receiver<BridgeEvent>)> {
        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");

        let pending: Arc<PendingMap> = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = mpsc::channel(64);

        spawn_reader(stdout, pending.clone(), tx);

        let bridge = Self { stdin: Mutex::new(stdin), pending, next_id: AtomicI64::new(1), _child: child };
        Ok((bridge, rx))
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let request = RpcRequest { jsonrpc: "2.0", id, method: method.to_string(), params };
        let mut line = serde_json::to_vec(&request).expect("RpcRequest always serializes");
        line.push(b'\n');

        {
            let mut stdin = self.stdin.lock().await;
            if stdin.write_all(&line).await.is_err() {
                self.pending.lock().await.remove(&id);
                return Err(RpcError { code: -32000, message: "bridge stdin closed".into() });
            }
        }

        rx.await.unwrap_or(Err(RpcError { code: -32001, message: "bridge reader task ended".into() }))
    }

    pub async fn init(&self, auth_dir: &str, print_qr: bool) -> Result<Value, RpcError> {
        self.call("init", serde_json::json!({ "auth_dir": auth_dir, "print_qr": print_qr })).await
    }

    pub async fn send_message(&self, to: &str, text: &str) -> Result<Value, RpcError> {
        self.call("sendMessage", serde_json::json!({ "to": to, "text": text })).await
    }

    pub async fn send_media(&self, to: &str, media_path: &str, caption: Option<&str>) -> Result<Value, RpcError> {
        self.call("sendMedia", serde_json::json!({ "to": to, "mediaPath": media_path, "caption": caption })).await
    }

    pub async fn send_reaction(&self, chat_jid: &str, message_id: &str, emoji: &str) -> Result<Value, RpcError> {
        self.call(
            "sendReaction",
            serde_json::json!({ "chatJid": chat_jid, "messageId": message_id, "emoji": emoji }),
        )
        .await
    }

    pub async fn send_poll(&self, to: &str, poll: Value) -> Result<Value, RpcError> {
        self.call("sendPoll", serde_json::json!({ "to": to, "poll": poll })).await
    }

    pub async fn mark_read(&self, messages: Value) -> Result<Value, RpcError> {
        self.call("markRead", serde_json::json!({ "messages": messages })).await
    }

    pub async fn send_presence(&self, presence: &str, to_jid: Option<&str>) -> Result<Value, RpcError> {
        self.call("sendPresence", serde_json::json!({ "presence": presence, "toJid": to_jid })).await
    }

    pub async fn get_contact_info(&self, jid: &str) -> Result<Value, RpcError> {
        self.call("getContactInfo", serde_json::json!({ "jid": jid })).await
    }

    pub async fn get_group_metadata(&self, jid: &str) -> Result<Value, RpcError> {
        self.call("getGroupMetadata", serde_json::json!({ "jid": jid })).await
    }

    pub async fn disconnect(&self) -> Result<Value, RpcError> {
        self.call("disconnect", Value::Null).await
    }
}

fn spawn_reader(stdout: tokio::process::ChildStdout, pending: Arc<PendingMap>, tx: mpsc::Sender<BridgeEvent>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => handle_line(&line, &pending, &tx).await,
                Ok(None) => {
                    info!("messaging bridge stdout closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "messaging bridge read error");
                    break;
                }
            }
        }
    });
}

async fn handle_line(line: &str, pending: &PendingMap, events: &mpsc::Sender<BridgeEvent>) {
    let Ok(parsed) = serde_json::from_str::<RpcResponse>(line) else {
        warn!(line, "unparseable line from messaging bridge");
        return;
    };

    if let Some(id) = parsed.id {
        if let Some(tx) = pending.lock().await.remove(&id) {
            let outcome = match (parsed.result, parsed.error) {
                (Some(result), _) => Ok(result),
                (None, Some(err)) => Err(err),
                (None, None) => Ok(Value::Null),
            };
            let _ = tx.send(outcome);
        }
        return;
    }

    let Some(method) = parsed.method else { return };
    let params = parsed.params.unwrap_or(Value::Null);
    debug!(method = %method, "messaging bridge notification");

    let event = match method.as_str() {
        "message" => BridgeEvent::Message(params),
        "connection" => BridgeEvent::Connection(params),
        "qr" => BridgeEvent::Qr(params),
        _ => return,
    };
    let _ = events.send(event).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_request_serializes_with_jsonrpc_2_0_envelope() {
        let req = RpcRequest { jsonrpc: "2.0", id: 1, method: "sendMessage".into(), params: Value::Null };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["jsonrpc"], "2.0");
        assert_eq!(v["method"], "sendMessage");
    }

    #[test]
    fn rpc_response_parses_a_result_reply() {
        let line = r#"{"jsonrpc":"2.0","id":7,"result":{"ok":true}}"#;
        let parsed: RpcResponse = serde_json::from_str(line).unwrap();
        assert_eq!(parsed.id, Some(7));
        assert!(parsed.result.is_some());
    }

    #[test]
    fn rpc_response_parses_an_error_reply() {
        let line = r#"{"jsonrpc":"2.0","id":7,"error":{"code":-1,"message":"nope"}}"#;
        let parsed: RpcResponse = serde_json::from_str(line).unwrap();
        assert_eq!(parsed.error.unwrap().code, -1);
    }

    #[test]
    fn rpc_response_parses_a_notification_without_an_id() {
        let line = r#"{"jsonrpc":"2.0","method":"qr","params":{"qr":"abc"}}"#;
        let parsed: RpcResponse = serde_json::from_str(line).unwrap();
        assert!(parsed.id.is_none());
        assert_eq!(parsed.method.as_deref(), Some("qr"));
    }
}
