//! Inbound Pipeline — dedup, access check, and per-sender coalescing before
//! handing a message to the orchestrator.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
    time::{Duration, Instant},
};

use super::{
    access::{ChannelAccessControl, Decision},
    ChatType, InboundMessage,
};

const DEDUP_TTL: Duration = Duration::from_secs(60);

struct DedupEntry {
    first_seen: Instant,
}

struct PendingEntry {
    message: InboundMessage,
    received_at: Instant,
}

struct State {
    dedup: HashMap<(String, String), DedupEntry>,
    queues: HashMap<String, Vec<PendingEntry>>,
}

/// Outcome of feeding one raw inbound event through the pipeline.
pub enum Outcome {
    /// Delivered, possibly the result of coalescing a burst.
    Deliver(InboundMessage),
    /// Rejected by access control; `reply` is the plain-text response to
    /// send back to the sender, if any.
    Rejected { reply: Option<String> },
    /// Held in the per-sender coalesce queue, awaiting a flush.
    Queued,
    /// Already seen within the dedup TTL; silently dropped.
    Duplicate,
}

/// Transforms raw channel events into at most one delivery per logical burst.
pub struct InboundPipeline {
    access: ChannelAccessControl,
    debounce: Duration,
    state: Mutex<State>,
}

impl InboundPipeline {
    pub fn new(access: ChannelAccessControl, debounce: Duration) -> Self {
        Self { access, debounce, state: Mutex::new(State { dedup: HashMap::new(), queues: HashMap::new() }) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run one raw event through dedup, access control, and coalescing.
    pub fn accept(&self, message: InboundMessage) -> Outcome {
        if self.is_duplicate(&message) {
            return Outcome::Duplicate;
        }

        let decision = match message.chat_type {
            ChatType::Direct => self.access.check_dm(&message.sender),
            ChatType::Group => self.access.check_group(&message.chat_id, &message.mentions),
        };

        let reply = match decision {
            Decision::Accept => None,
            Decision::Reject { reason, pairing_code: Some(code) } => {
                Some(format!("{reason}. Reply with this code to pair: {code}"))
            }
            Decision::Reject { reason, pairing_code: None } => Some(reason),
        };
        if let Some(reply) = reply {
            return Outcome::Rejected { reply: Some(reply) };
        }

        if self.debounce.is_zero() {
            return Outcome::Deliver(message);
        }

        let mut state = self.lock();
        state
            .queues
            .entry(message.sender.clone())
            .or_default()
            .push(PendingEntry { message, received_at: Instant::now() });
        Outcome::Queued
    }

    fn is_duplicate(&self, message: &InboundMessage) -> bool {
        let mut state = self.lock();
        let now = Instant::now();
        state.dedup.retain(|_, entry| now.duration_since(entry.first_seen) < DEDUP_TTL);

        let key = (message.chat_id.clone(), message.message_id.clone());
        if state.dedup.contains_key(&key) {
            true
        } else {
            state.dedup.insert(key, DedupEntry { first_seen: now });
            false
        }
    }

    /// Flush every per-sender queue whose oldest entry has aged past the
    /// debounce window, returning one combined message per flushed sender.
    pub fn flush_ready(&self) -> Vec<InboundMessage> {
        let mut state = self.lock();
        let now = Instant::now();
        let mut ready_senders = Vec::new();
        for (sender, entries) in state.queues.iter() {
            if let Some(first) = entries.first() {
                if now.duration_since(first.received_at) >= self.debounce {
                    ready_senders.push(sender.clone());
                }
            }
        }

        let mut flushed = Vec::new();
        for sender in ready_senders {
            if let Some(entries) = state.queues.remove(&sender) {
                if let Some(combined) = combine(entries) {
                    flushed.push(combined);
                }
            }
        }
        flushed
    }
}

fn combine(entries: Vec<PendingEntry>) -> Option<InboundMessage> {
    let last = entries.last()?.message.clone();
    if entries.len() == 1 {
        return Some(last);
    }

    let body = entries
        .iter()
        .map(|e| e.message.body.as_str())
        .filter(|b| !b.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    let mut mentions: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for entry in &entries {
        for m in &entry.message.mentions {
            if seen.insert(m.clone()) {
                mentions.push(m.clone());
            }
        }
    }

    Some(InboundMessage { body, mentions, ..last })
}
