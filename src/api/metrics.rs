//! Prometheus-compatible `GET /metrics` endpoint.
//!
//! All endpoint-level gauges come from the Health Tracker's live snapshot —
//! there is no separate ring-buffer window; health counters already are the
//! running totals since process start or the last explicit reset.
//!
//! Metric families:
//! - `gatehand_endpoint_requests_total`      — per-endpoint success/failure counts
//! - `gatehand_endpoint_health_score`        — current health score, per endpoint
//! - `gatehand_endpoint_consecutive_failures`
//! - `gatehand_endpoint_latency_ema_seconds` — exponential moving average of
//!   upstream response latency, per endpoint (the tracker keeps a running
//!   EMA rather than raw samples, so this is rendered as a gauge rather than
//!   a bucketed histogram)
//! - `gatehand_sessions_total` / `gatehand_sessions_active`

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};

use crate::{session::SessionStatus, state::AppState};

pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut out = String::with_capacity(1024);

    out.push_str("# HELP gatehand_endpoint_requests_total Requests per endpoint, labelled by outcome.\n");
    out.push_str("# TYPE gatehand_endpoint_requests_total counter\n");
    out.push_str("# HELP gatehand_endpoint_health_score Current health score in [0,1].\n");
    out.push_str("# TYPE gatehand_endpoint_health_score gauge\n");
    out.push_str("# HELP gatehand_endpoint_consecutive_failures Consecutive failures since the last success.\n");
    out.push_str("# TYPE gatehand_endpoint_consecutive_failures gauge\n");
    out.push_str("# HELP gatehand_endpoint_latency_ema_seconds Exponential moving average of upstream response latency.\n");
    out.push_str("# TYPE gatehand_endpoint_latency_ema_seconds gauge\n");

    let mut snapshot = state.tracker.snapshot_all();
    snapshot.sort_by(|a, b| a.0.cmp(&b.0));
    for (id, health) in &snapshot {
        out.push_str(&format!("gatehand_endpoint_requests_total{{endpoint=\"{id}\",outcome=\"success\"}} {}\n", health.success));
        out.push_str(&format!("gatehand_endpoint_requests_total{{endpoint=\"{id}\",outcome=\"failure\"}} {}\n", health.failure));
        out.push_str(&format!("gatehand_endpoint_health_score{{endpoint=\"{id}\"}} {}\n", health.score()));
        out.push_str(&format!(
            "gatehand_endpoint_consecutive_failures{{endpoint=\"{id}\"}} {}\n",
            health.consecutive_failures
        ));
        out.push_str(&format!(
            "gatehand_endpoint_latency_ema_seconds{{endpoint=\"{id}\"}} {}\n",
            health.latency_ema.as_secs_f64()
        ));
    }
    out.push('\n');

    let sessions = state.sessions.list();
    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_millis() as i64;
    let active = sessions.iter().filter(|s| s.effective_status(now) == SessionStatus::Active).count();

    out.push_str("# HELP gatehand_sessions_total Total known sessions.\n");
    out.push_str("# TYPE gatehand_sessions_total gauge\n");
    out.push_str(&format!("gatehand_sessions_total {}\n", sessions.len()));
    out.push_str("# HELP gatehand_sessions_active Sessions active (not idle or terminated).\n");
    out.push_str("# TYPE gatehand_sessions_active gauge\n");
    out.push_str(&format!("gatehand_sessions_active {active}\n"));

    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")], out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthTracker;
    use std::time::Duration;

    #[test]
    fn snapshot_all_contains_recorded_endpoints() {
        let tracker = HealthTracker::new();
        tracker.record_success("ep-a", Duration::from_millis(50));
        let snap = tracker.snapshot_all();
        let (_, health) = snap.iter().find(|(id, _)| id == "ep-a").expect("ep-a recorded");
        assert_eq!(health.success, 1);
    }

    #[test]
    fn recorded_latency_is_reflected_in_the_ema() {
        let tracker = HealthTracker::new();
        tracker.record_success("ep-a", Duration::from_millis(200));
        let snap = tracker.snapshot_all();
        let (_, health) = snap.iter().find(|(id, _)| id == "ep-a").expect("ep-a recorded");
        assert!(health.latency_ema.as_secs_f64() > 0.0);
    }
}
