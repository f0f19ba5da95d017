//! Health Tracker — per-endpoint success/failure accounting and cooldowns.
//!
//! One [`ModelHealth`] entry per endpoint, created lazily on first
//! observation. Guarded by a single `std::sync::Mutex` over the whole map —
//! no entry is ever held across an `.await`, so a sync mutex is enough and
//! avoids unnecessary task suspension.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use crate::{error::ErrorKind, pool::ModelEndpoint};

/// Coarse health state derived from [`ModelHealth::score`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Cooldown,
}

/// Per-endpoint mutable health record.
#[derive(Debug, Clone)]
pub struct ModelHealth {
    pub success: u64,
    pub failure: u64,
    pub last_success: Option<Instant>,
    pub last_failure: Option<Instant>,
    pub last_error: Option<ErrorKind>,
    pub consecutive_failures: u32,
    pub cooldown_until: Option<Instant>,
    /// Exponential moving average of request latency.
    pub latency_ema: Duration,
}

impl Default for ModelHealth {
    fn default() -> Self {
        Self {
            success: 0,
            failure: 0,
            last_success: None,
            last_failure: None,
            last_error: None,
            consecutive_failures: 0,
            cooldown_until: None,
            latency_ema: Duration::ZERO,
        }
    }
}

impl ModelHealth {
    pub fn total(&self) -> u64 {
        self.success + self.failure
    }

    /// `clamp(success/total − 0.1·consecutive_failures, 0, 1)`; 1.0 when unused.
    pub fn score(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 1.0;
        }
        let raw = self.success as f64 / total as f64 - 0.1 * self.consecutive_failures as f64;
        raw.clamp(0.0, 1.0)
    }

    /// Maps [`Self::score`] onto the four-state health machine.
    pub fn status(&self) -> HealthStatus {
        let score = self.score();
        if score >= 0.8 {
            HealthStatus::Healthy
        } else if score >= 0.5 {
            HealthStatus::Degraded
        } else if score >= 0.0 {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Cooldown
        }
    }
}

/// Thread-safe per-endpoint health accounting.
pub struct HealthTracker {
    entries: Mutex<HashMap<String, ModelHealth>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ModelHealth>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a successful call, resetting `consecutive_failures` and
    /// updating the latency EMA.
    pub fn record_success(&self, id: &str, latency: Duration) {
        let mut entries = self.lock();
        let entry = entries.entry(id.to_string()).or_default();
        entry.success += 1;
        entry.consecutive_failures = 0;
        entry.last_error = None;
        entry.last_success = Some(Instant::now());
        entry.latency_ema = if entry.latency_ema.is_zero() {
            latency
        } else {
            entry.latency_ema.mul_f64(0.9) + latency.mul_f64(0.1)
        };
    }

    /// Record a failed call, bumping `consecutive_failures` and setting
    /// `cooldown_until = now + D(kind)`.
    pub fn record_failure(&self, id: &str, kind: ErrorKind) {
        let mut entries = self.lock();
        let entry = entries.entry(id.to_string()).or_default();
        entry.failure += 1;
        entry.consecutive_failures += 1;
        entry.last_error = Some(kind);
        let now = Instant::now();
        entry.last_failure = Some(now);
        entry.cooldown_until = Some(now + kind.cooldown());
    }

    /// True when no entry exists yet (unobserved = available), or the
    /// endpoint is past cooldown and not unhealthy/in-cooldown status.
    pub fn is_available(&self, id: &str) -> bool {
        let entries = self.lock();
        let Some(entry) = entries.get(id) else { return true };
        let now = Instant::now();
        let past_cooldown = entry.cooldown_until.is_none_or(|until| now >= until);
        past_cooldown && !matches!(entry.status(), HealthStatus::Unhealthy | HealthStatus::Cooldown)
    }

    /// Filter `endpoints` down to those currently available.
    pub fn available_subset<'a>(&self, endpoints: &[&'a ModelEndpoint]) -> Vec<&'a ModelEndpoint> {
        endpoints.iter().copied().filter(|e| self.is_available(&e.id)).collect()
    }

    /// Stable descending sort by score; unobserved endpoints score 1.0.
    pub fn by_health<'a>(&self, endpoints: &[&'a ModelEndpoint]) -> Vec<&'a ModelEndpoint> {
        let entries = self.lock();
        let mut v: Vec<&'a ModelEndpoint> = endpoints.to_vec();
        v.sort_by(|a, b| {
            let score_a = entries.get(&a.id).map(ModelHealth::score).unwrap_or(1.0);
            let score_b = entries.get(&b.id).map(ModelHealth::score).unwrap_or(1.0);
            score_b.partial_cmp(&score_a).unwrap_or(std::cmp::Ordering::Equal)
        });
        v
    }

    /// Snapshot of the current record for introspection (`/metrics`, status endpoints).
    pub fn snapshot(&self, id: &str) -> Option<ModelHealth> {
        self.lock().get(id).cloned()
    }

    /// Every tracked endpoint id and its current record, for `/metrics`.
    pub fn snapshot_all(&self) -> Vec<(String, ModelHealth)> {
        self.lock().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Remove the entry for `id` — the next observation starts fresh.
    pub fn reset(&self, id: &str) {
        self.lock().remove(id);
    }
}
