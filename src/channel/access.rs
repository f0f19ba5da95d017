//! Channel Access Control — per-sender DM/group policy and the pairing
//! handshake.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
    time::{Duration, Instant},
};

use rand::Rng;

use super::{ChannelConfig, DmPolicy, GroupPolicy};

const PAIRING_TTL: Duration = Duration::from_secs(300);

/// Result of an access-control decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject { reason: String, pairing_code: Option<String> },
}

struct PairingEntry {
    code: String,
    issued_at: Instant,
}

impl PairingEntry {
    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.issued_at) > PAIRING_TTL
    }
}

struct State {
    paired: HashSet<String>,
    pending: HashMap<String, PairingEntry>,
}

/// Per-sender access policy and pairing-handshake state for one channel.
pub struct ChannelAccessControl {
    config: ChannelConfig,
    self_identity: String,
    state: Mutex<State>,
}

impl ChannelAccessControl {
    pub fn new(config: ChannelConfig, self_identity: impl Into<String>) -> Self {
        Self {
            config,
            self_identity: self_identity.into(),
            state: Mutex::new(State { paired: HashSet::new(), pending: HashMap::new() }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decide whether a direct message from `sender` (canonical form) is allowed.
    pub fn check_dm(&self, sender: &str) -> Decision {
        match self.config.dm_policy {
            DmPolicy::Disabled => Decision::Reject { reason: "DM access disabled".into(), pairing_code: None },
            DmPolicy::Allowlist => {
                if self.config.allowlist.iter().any(|a| a == "*" || a == sender) {
                    Decision::Accept
                } else {
                    Decision::Reject { reason: "sender not on allowlist".into(), pairing_code: None }
                }
            }
            DmPolicy::Open => Decision::Accept,
            DmPolicy::Pairing => {
                let mut state = self.lock();
                if state.paired.contains(sender) {
                    return Decision::Accept;
                }
                self.purge_expired_locked(&mut state);
                let code = generate_pairing_code();
                state.pending.insert(sender.to_string(), PairingEntry { code: code.clone(), issued_at: Instant::now() });
                Decision::Reject { reason: "pairing required".into(), pairing_code: Some(code) }
            }
        }
    }

    /// Decide whether a group message is allowed.
    ///
    /// `mentions` is the message's mentioned-identities list; when
    /// `group_require_mention` is set, this channel's own identity must
    /// appear in it.
    pub fn check_group(&self, group_id: &str, mentions: &[String]) -> Decision {
        if self.config.group_require_mention && !mentions.iter().any(|m| m == &self.self_identity) {
            return Decision::Reject { reason: "group requires a mention".into(), pairing_code: None };
        }
        match self.config.group_policy {
            GroupPolicy::Disabled => Decision::Reject { reason: "group access disabled".into(), pairing_code: None },
            GroupPolicy::Allowlist => {
                if self.config.group_allowlist.iter().any(|g| g == group_id) {
                    Decision::Accept
                } else {
                    Decision::Reject { reason: "group not on allowlist".into(), pairing_code: None }
                }
            }
            GroupPolicy::Open => Decision::Accept,
        }
    }

    /// Verify a submitted pairing code for `sender`. The pending entry is
    /// always consumed (single-shot), whether or not verification succeeds.
    pub fn verify_pairing(&self, sender: &str, submitted_code: &str) -> bool {
        let mut state = self.lock();
        let Some(entry) = state.pending.remove(sender) else { return false };
        let ok = !entry.expired(Instant::now()) && entry.code == submitted_code;
        if ok {
            state.paired.insert(sender.to_string());
        }
        ok
    }

    /// Drop any pending pairing entries older than 300 s.
    pub fn purge_expired(&self) {
        let mut state = self.lock();
        self.purge_expired_locked(&mut state);
    }

    fn purge_expired_locked(&self, state: &mut State) {
        let now = Instant::now();
        state.pending.retain(|_, entry| !entry.expired(now));
    }
}

fn generate_pairing_code() -> String {
    rand::thread_rng().gen_range(100_000..1_000_000).to_string()
}

/// Strip all non-digit characters; prepend `+` if nonzero length and no
/// leading `+` was already present.
pub fn normalize_identifier(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        digits
    } else {
        format!("+{digits}")
    }
}

/// `8..15` digits after an optional leading `+`.
pub fn is_valid_identifier(id: &str) -> bool {
    let digits = id.strip_prefix('+').unwrap_or(id);
    (8..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dm: DmPolicy, group: GroupPolicy) -> ChannelConfig {
        ChannelConfig {
            dm_policy: dm,
            group_policy: group,
            allowlist: vec![],
            group_allowlist: vec![],
            group_require_mention: false,
            media_max_mb: 16,
            debounce_ms: 0,
            read_receipts: false,
            group_activation_commands: vec![],
        }
    }

    #[test]
    fn disabled_dm_rejects_with_fixed_reason() {
        let acl = ChannelAccessControl::new(config(DmPolicy::Disabled, GroupPolicy::Disabled), "+10000000000");
        assert_eq!(
            acl.check_dm("+15551234567"),
            Decision::Reject { reason: "DM access disabled".into(), pairing_code: None }
        );
    }

    #[test]
    fn allowlist_wildcard_accepts_everyone() {
        let mut cfg = config(DmPolicy::Allowlist, GroupPolicy::Disabled);
        cfg.allowlist = vec!["*".into()];
        let acl = ChannelAccessControl::new(cfg, "+10000000000");
        assert_eq!(acl.check_dm("+15551234567"), Decision::Accept);
    }

    #[test]
    fn pairing_handshake_full_cycle() {
        let acl = ChannelAccessControl::new(config(DmPolicy::Pairing, GroupPolicy::Disabled), "+10000000000");
        let sender = "+15551234567";

        let first = acl.check_dm(sender);
        let code = match first {
            Decision::Reject { pairing_code: Some(code), .. } => code,
            other => panic!("expected a pairing code, got {other:?}"),
        };

        assert!(acl.verify_pairing(sender, &code));
        assert_eq!(acl.check_dm(sender), Decision::Accept);
    }

    #[test]
    fn pairing_code_is_single_use() {
        let acl = ChannelAccessControl::new(config(DmPolicy::Pairing, GroupPolicy::Disabled), "+10000000000");
        let sender = "+15551234567";
        let code = match acl.check_dm(sender) {
            Decision::Reject { pairing_code: Some(code), .. } => code,
            other => panic!("expected a pairing code, got {other:?}"),
        };
        assert!(acl.verify_pairing(sender, &code));
        assert!(!acl.verify_pairing(sender, &code));
    }

    #[test]
    fn wrong_code_consumes_the_pending_entry_anyway() {
        let acl = ChannelAccessControl::new(config(DmPolicy::Pairing, GroupPolicy::Disabled), "+10000000000");
        let sender = "+15551234567";
        acl.check_dm(sender);
        assert!(!acl.verify_pairing(sender, "000000"));
        assert!(!acl.verify_pairing(sender, "000000"));
    }

    #[test]
    fn group_requires_mention_rejects_without_one() {
        let mut cfg = config(DmPolicy::Disabled, GroupPolicy::Open);
        cfg.group_require_mention = true;
        let acl = ChannelAccessControl::new(cfg, "+10000000000");
        let decision = acl.check_group("group-1", &[]);
        assert!(matches!(decision, Decision::Reject { .. }));
    }

    #[test]
    fn group_requires_mention_accepts_with_self_identity_present() {
        let mut cfg = config(DmPolicy::Disabled, GroupPolicy::Open);
        cfg.group_require_mention = true;
        let acl = ChannelAccessControl::new(cfg, "+10000000000");
        let decision = acl.check_group("group-1", &["+10000000000".to_string()]);
        assert_eq!(decision, Decision::Accept);
    }

    #[test]
    fn normalize_strips_non_digits_and_prepends_plus() {
        assert_eq!(normalize_identifier("+1 (555) 123-4567"), "+15551234567");
        assert_eq!(normalize_identifier("15551234567"), "+15551234567");
        assert_eq!(normalize_identifier(""), "");
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize_identifier("+1 (555) 123-4567");
        let twice = normalize_identifier(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn validity_checks_digit_length_bounds() {
        assert!(is_valid_identifier("+15551234567"));
        assert!(!is_valid_identifier("+1234567")); // 7 digits, too short
        assert!(!is_valid_identifier("+1234567890123456")); // 16 digits, too long
    }
}
