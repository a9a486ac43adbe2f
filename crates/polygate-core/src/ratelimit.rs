use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const GLOBAL_SCOPE: &str = "global";

const JANITOR_INTERVAL: Duration = Duration::from_secs(60);
const STALE_AFTER: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    started: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Instant at which the current window ends.
    pub reset_at: Instant,
}

/// Fixed-window request counter, keyed per API key (`key:<uuid>`) and
/// globally. Process-local; replicas limit independently.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_scope(api_key_id: impl std::fmt::Display) -> String {
        format!("key:{api_key_id}")
    }

    pub fn check(&self, scope: &str, max: u32, window: Duration) -> RateDecision {
        let now = Instant::now();
        let mut windows = self.windows.lock().expect("rate limiter lock poisoned");

        match windows.get_mut(scope) {
            Some(entry) if now.duration_since(entry.started) < window => {
                if entry.count >= max {
                    return RateDecision {
                        allowed: false,
                        remaining: 0,
                        reset_at: entry.started + window,
                    };
                }
                entry.count += 1;
                RateDecision {
                    allowed: true,
                    remaining: max.saturating_sub(entry.count),
                    reset_at: entry.started + window,
                }
            }
            _ => {
                windows.insert(
                    scope.to_string(),
                    Window {
                        count: 1,
                        started: now,
                    },
                );
                RateDecision {
                    allowed: true,
                    remaining: max.saturating_sub(1),
                    reset_at: now + window,
                }
            }
        }
    }

    /// Evicts windows idle for more than five minutes, once a minute.
    pub fn spawn_janitor(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(JANITOR_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                limiter.evict_stale(Instant::now());
            }
        })
    }

    fn evict_stale(&self, now: Instant) {
        let mut windows = self.windows.lock().expect("rate limiter lock poisoned");
        windows.retain(|_, entry| now.duration_since(entry.started) < STALE_AFTER);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_n_allowed_then_denied_with_reset() {
        let limiter = RateLimiter::new();
        let window = Duration::from_secs(60);

        let mut reset_at = None;
        for n in 0..3 {
            let decision = limiter.check("key:a", 3, window);
            assert!(decision.allowed, "call {n} should pass");
            assert_eq!(decision.remaining, 2 - n);
            reset_at = Some(decision.reset_at);
        }

        let denied = limiter.check("key:a", 3, window);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(Some(denied.reset_at), reset_at);
    }

    #[test]
    fn scopes_are_independent() {
        let limiter = RateLimiter::new();
        let window = Duration::from_secs(60);
        assert!(limiter.check("key:a", 1, window).allowed);
        assert!(!limiter.check("key:a", 1, window).allowed);
        assert!(limiter.check("key:b", 1, window).allowed);
        assert!(limiter.check(GLOBAL_SCOPE, 1, window).allowed);
    }

    #[test]
    fn elapsed_window_resets_the_counter() {
        let limiter = RateLimiter::new();
        let window = Duration::from_millis(0);
        assert!(limiter.check("key:a", 1, window).allowed);
        // Zero-length window: the next call starts a fresh one.
        assert!(limiter.check("key:a", 1, window).allowed);
    }

    #[test]
    fn janitor_evicts_only_stale_windows() {
        let limiter = RateLimiter::new();
        limiter.check("key:old", 5, Duration::from_secs(60));
        limiter.evict_stale(Instant::now() + STALE_AFTER + Duration::from_secs(1));
        let windows = limiter.windows.lock().unwrap();
        assert!(windows.is_empty());
    }
}
