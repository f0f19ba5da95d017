//! Rate Limiter — cooldowns and a daily cap for autonomous actions (posts,
//! comments) taken outside the request/response path.

use std::sync::Mutex;

const POST_COOLDOWN_MS: i64 = 30 * 60 * 1000;
const COMMENT_COOLDOWN_MS: i64 = 20 * 1000;
const DAILY_COMMENT_CAP: u32 = 50;
const DAY_MS: i64 = 86_400_000;

struct State {
    last_post_ms: Option<i64>,
    last_comment_ms: Option<i64>,
    count_today: u32,
    last_reset_ms: i64,
}

/// Single-owner cooldown/cap tracking; wrap in a mutex if shared across tasks.
pub struct RateLimiter {
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(now_ms: i64) -> Self {
        Self { state: Mutex::new(State { last_post_ms: None, last_comment_ms: None, count_today: 0, last_reset_ms: now_ms }) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn roll_day_if_needed(&self, state: &mut State, now_ms: i64) {
        if now_ms / DAY_MS > state.last_reset_ms / DAY_MS {
            state.count_today = 0;
            state.last_reset_ms = now_ms;
        }
    }

    pub fn can_post(&self, now_ms: i64) -> bool {
        let state = self.lock();
        match state.last_post_ms {
            None => true,
            Some(last) => now_ms - last >= POST_COOLDOWN_MS,
        }
    }

    pub fn can_comment(&self, now_ms: i64) -> bool {
        let mut state = self.lock();
        self.roll_day_if_needed(&mut state, now_ms);
        let cooldown_elapsed = match state.last_comment_ms {
            None => true,
            Some(last) => now_ms - last >= COMMENT_COOLDOWN_MS,
        };
        cooldown_elapsed && state.count_today < DAILY_COMMENT_CAP
    }

    pub fn record_post(&self, now_ms: i64) {
        self.lock().last_post_ms = Some(now_ms);
    }

    pub fn record_comment(&self, now_ms: i64) {
        let mut state = self.lock();
        self.roll_day_if_needed(&mut state, now_ms);
        state.last_comment_ms = Some(now_ms);
        state.count_today += 1;
    }

    /// Milliseconds until `can_post` would next return true; 0 if it
    /// already does.
    pub fn remaining_until_post(&self, now_ms: i64) -> i64 {
        let state = self.lock();
        match state.last_post_ms {
            None => 0,
            Some(last) => (POST_COOLDOWN_MS - (now_ms - last)).max(0),
        }
    }

    pub fn remaining_until_comment(&self, now_ms: i64) -> i64 {
        let state = self.lock();
        match state.last_comment_ms {
            None => 0,
            Some(last) => (COMMENT_COOLDOWN_MS - (now_ms - last)).max(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_limiter_allows_post_and_comment() {
        let limiter = RateLimiter::new(0);
        assert!(limiter.can_post(0));
        assert!(limiter.can_comment(0));
    }

    #[test]
    fn post_cooldown_blocks_until_thirty_minutes_elapse() {
        let limiter = RateLimiter::new(0);
        limiter.record_post(0);
        assert!(!limiter.can_post(POST_COOLDOWN_MS - 1));
        assert!(limiter.can_post(POST_COOLDOWN_MS));
    }

    #[test]
    fn comment_cooldown_blocks_until_twenty_seconds_elapse() {
        let limiter = RateLimiter::new(0);
        limiter.record_comment(0);
        assert!(!limiter.can_comment(COMMENT_COOLDOWN_MS - 1));
        assert!(limiter.can_comment(COMMENT_COOLDOWN_MS));
    }

    #[test]
    fn daily_cap_blocks_the_fifty_first_comment() {
        let limiter = RateLimiter::new(0);
        let mut now = 0i64;
        for _ in 0..50 {
            assert!(limiter.can_comment(now));
            limiter.record_comment(now);
            now += COMMENT_COOLDOWN_MS;
        }
        assert!(!limiter.can_comment(now));
    }

    #[test]
    fn daily_cap_resets_on_the_next_calendar_day() {
        let limiter = RateLimiter::new(0);
        let mut now = 0i64;
        for _ in 0..50 {
            limiter.record_comment(now);
            now += COMMENT_COOLDOWN_MS;
        }
        let next_day = DAY_MS + 1;
        assert!(limiter.can_comment(next_day));
    }

    #[test]
    fn remaining_until_post_counts_down_to_zero() {
        let limiter = RateLimiter::new(0);
        limiter.record_post(0);
        assert_eq!(limiter.remaining_until_post(0), POST_COOLDOWN_MS);
        assert_eq!(limiter.remaining_until_post(POST_COOLDOWN_MS), 0);
    }
}
