//! Outbound Pipeline — markdown-table flattening, chunking, and retry on
//! transient send failures.

use std::time::Duration;

use tracing::warn;

const MAX_CHUNK_LEN: usize = 4000;
const MAX_RETRIES: u32 = 3;
const RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Transport-level send failures the outbound pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    ConnectionReset,
    ConnectionTimedOut,
    NetworkUnreachable,
    TemporaryFailure,
    /// Any other transport failure — never retried.
    Other,
}

impl SendError {
    /// A send that fails with a timed-out connection is retried like any
    /// other transient transport error; an overall pipeline-level timeout
    /// (the deadline for the whole multi-chunk send) is not modeled here —
    /// see `OutboundPipeline::send`'s retry loop for what is and isn't
    /// retried.
    fn is_retryable(self) -> bool {
        matches!(
            self,
            SendError::ConnectionReset
                | SendError::ConnectionTimedOut
                | SendError::NetworkUnreachable
                | SendError::TemporaryFailure
        )
    }
}

/// Sends one chunk and returns the transport-assigned message id.
#[async_trait::async_trait]
pub trait ChunkSender: Send + Sync {
    async fn send_chunk(&self, chat_id: &str, text: &str) -> Result<String, SendError>;
    async fn send_media(&self, chat_id: &str, path: &str, caption: Option<&str>) -> Result<String, SendError>;
}

pub struct OutboundPipeline<S: ChunkSender> {
    sender: S,
    media_max_mb: u32,
}

impl<S: ChunkSender> OutboundPipeline<S> {
    pub fn new(sender: S, media_max_mb: u32) -> Self {
        Self { sender, media_max_mb }
    }

    /// Flatten markdown tables, chunk to at most 4000 code units, and send
    /// each chunk in order, retrying transient failures up to 3 times with
    /// a 1-second pause.
    ///
    /// A chunk timeout does not consume retry budget — it is not in the
    /// retryable set, so it surfaces to the caller immediately.
    pub async fn send(&self, chat_id: &str, text: &str) -> Result<Vec<String>, SendError> {
        let flattened = flatten_tables(text);
        let chunks = chunk(&flattened, MAX_CHUNK_LEN);

        let mut ids = Vec::with_capacity(chunks.len());
        for chunk_text in chunks {
            let id = self.send_with_retry(chat_id, &chunk_text).await?;
            ids.push(id);
        }
        Ok(ids)
    }

    async fn send_with_retry(&self, chat_id: &str, text: &str) -> Result<String, SendError> {
        let mut attempt = 0;
        loop {
            match self.sender.send_chunk(chat_id, text).await {
                Ok(id) => return Ok(id),
                Err(err) if err.is_retryable() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    warn!(chat_id, attempt, ?err, "retrying outbound chunk send");
                    tokio::time::sleep(RETRY_PAUSE).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Send a media file with an optional (table-flattened) caption.
    /// Rejects up front if the file exceeds `media_max_mb` MiB.
    pub async fn send_media(
        &self,
        chat_id: &str,
        path: &str,
        size_bytes: u64,
        caption: Option<&str>,
    ) -> Result<String, SendError> {
        if size_bytes > self.media_max_mb as u64 * 1024 * 1024 {
            return Err(SendError::Other);
        }
        let caption = caption.map(|c| flatten_tables(c));
        self.sender.send_media(chat_id, path, caption.as_deref()).await
    }
}

/// Drop markdown-table separator rows (`|---|---|`) and replace pipes with
/// single spaces elsewhere.
fn flatten_tables(text: &str) -> String {
    text.lines()
        .filter(|line| !is_table_separator(line))
        .map(|line| line.replace('|', " ").trim_end().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_table_separator(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && trimmed.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

/// Split `text` into chunks of at most `limit` UTF-16 code units, breaking
/// at the latest whitespace boundary before the limit; if no whitespace
/// exists in range, break exactly at the limit.
fn chunk(text: &str, limit: usize) -> Vec<String> {
    let units: Vec<char> = text.chars().collect();
    // Work in UTF-16 code unit space per the boundary rule, but split on
    // char boundaries to stay correct for multi-byte text.
    let mut result = Vec::new();
    let mut start = 0;

    while start < units.len() {
        let mut len = 0usize;
        let mut end = start;
        while end < units.len() {
            let units_for_char = units[end].len_utf16();
            if len + units_for_char > limit {
                break;
            }
            len += units_for_char;
            end += 1;
        }

        if end == units.len() {
            result.push(units[start..end].iter().collect());
            break;
        }

        // Search backwards from `end` for the latest whitespace. The
        // whitespace itself leads the next chunk rather than trailing this
        // one, so the split point is the whitespace's own index.
        let mut split_at = end;
        let mut found = false;
        while split_at > start {
            if units[split_at - 1].is_whitespace() {
                found = true;
                split_at -= 1;
                break;
            }
            split_at -= 1;
        }

        let actual_end = if found { split_at } else { end.max(start + 1) };
        result.push(units[start..actual_end].iter().collect());
        start = actual_end;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakySender {
        failures_remaining: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ChunkSender for FlakySender {
        async fn send_chunk(&self, _chat_id: &str, _text: &str) -> Result<String, SendError> {
            if self.failures_remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n > 0 { Some(n - 1) } else { None }
            }).is_ok() {
                Err(SendError::ConnectionReset)
            } else {
                Ok("msg-1".into())
            }
        }

        async fn send_media(&self, _chat_id: &str, _path: &str, _caption: Option<&str>) -> Result<String, SendError> {
            Ok("media-1".into())
        }
    }

    struct AlwaysFailSender;

    #[async_trait::async_trait]
    impl ChunkSender for AlwaysFailSender {
        async fn send_chunk(&self, _chat_id: &str, _text: &str) -> Result<String, SendError> {
            Err(SendError::Other)
        }
        async fn send_media(&self, _chat_id: &str, _path: &str, _caption: Option<&str>) -> Result<String, SendError> {
            Err(SendError::Other)
        }
    }

    #[test]
    fn table_separator_rows_are_dropped_and_pipes_replaced() {
        let text = "| a | b |\n|---|---|\n| 1 | 2 |";
        let flattened = flatten_tables(text);
        assert!(!flattened.contains('|'));
        assert!(!flattened.contains("---"));
        assert!(flattened.contains('1'));
    }

    #[test]
    fn chunk_breaks_at_whitespace_before_the_limit() {
        // 4001 code units, a single space at position 3500: first chunk ends
        // at the space (length 3500); the space itself leads the second
        // chunk, giving it length 501.
        let mut text = "a".repeat(3500);
        text.push(' ');
        text.push_str(&"b".repeat(500));
        let chunks = chunk(&text, 4000);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 3500);
        assert_eq!(chunks[1].chars().count(), 501);
    }

    #[test]
    fn chunk_with_no_whitespace_breaks_at_the_limit() {
        let text = "a".repeat(8000);
        let chunks = chunk(&text, 4000);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 4000);
    }

    #[tokio::test]
    async fn retries_up_to_three_times_on_connection_reset() {
        let sender = FlakySender { failures_remaining: AtomicUsize::new(2) };
        let pipeline = OutboundPipeline::new(sender, 16);
        let ids = pipeline.send("chat-1", "hello").await.unwrap();
        assert_eq!(ids, vec!["msg-1"]);
    }

    #[tokio::test]
    async fn non_retryable_failure_propagates_immediately() {
        let pipeline = OutboundPipeline::new(AlwaysFailSender, 16);
        let err = pipeline.send("chat-1", "hello").await.unwrap_err();
        assert_eq!(err, SendError::Other);
    }

    #[tokio::test]
    async fn oversized_media_is_rejected_before_calling_the_transport() {
        let pipeline = OutboundPipeline::new(FlakySender { failures_remaining: AtomicUsize::new(0) }, 1);
        let err = pipeline.send_media("chat-1", "/tmp/big.png", 2 * 1024 * 1024, None).await.unwrap_err();
        assert_eq!(err, SendError::Other);
    }
}
