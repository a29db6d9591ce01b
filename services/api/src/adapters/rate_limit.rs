//! services/api/src/adapters/rate_limit.rs
//!
//! An in-memory, fixed-window implementation of the `RateLimiter` port.
//!
//! Counters are keyed by `namespace:identifier`. The number of tracked keys
//! never exceeds `max_tracked_keys`: when a new key arrives at capacity, windows
//! that have already ended are pruned, and if the map is still full the request
//! is denied until the earliest live window ends.

use async_trait::async_trait;
use coin_ledger_core::ports::{PortResult, RateLimitDecision, RateLimitPolicy, RateLimiter};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

const DEFAULT_MAX_TRACKED_KEYS: usize = 10_000;

struct Window {
    started: Instant,
    length: std::time::Duration,
    count: u32,
}

impl Window {
    fn is_over(&self, now: Instant) -> bool {
        now.duration_since(self.started) >= self.length
    }
}

pub struct FixedWindowRateLimiter {
    windows: Mutex<HashMap<String, Window>>,
    max_tracked_keys: usize,
}

impl Default for FixedWindowRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TRACKED_KEYS)
    }
}

impl FixedWindowRateLimiter {
    pub fn new(max_tracked_keys: usize) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_tracked_keys,
        }
    }

    pub async fn tracked_keys(&self) -> usize {
        self.windows.lock().await.len()
    }
}

#[async_trait]
impl RateLimiter for FixedWindowRateLimiter {
    async fn check(
        &self,
        identifier: &str,
        policy: &RateLimitPolicy,
    ) -> PortResult<RateLimitDecision> {
        let key = format!("{}:{}", policy.namespace, identifier);
        let now = Instant::now();
        let mut windows = self.windows.lock().await;

        if !windows.contains_key(&key) && windows.len() >= self.max_tracked_keys {
            windows.retain(|_, w| !w.is_over(now));
            if windows.len() >= self.max_tracked_keys {
                let reset_in = windows
                    .values()
                    .map(|w| w.length.saturating_sub(now.duration_since(w.started)))
                    .min()
                    .unwrap_or(policy.window);
                warn!(
                    namespace = policy.namespace,
                    tracked_keys = windows.len(),
                    "Rejecting new rate-limit key: tracked key limit reached"
                );
                return Ok(RateLimitDecision {
                    allowed: false,
                    remaining: 0,
                    reset_in,
                });
            }
        }

        let window = windows.entry(key).or_insert_with(|| Window {
            started: now,
            length: policy.window,
            count: 0,
        });
        if window.is_over(now) {
            window.started = now;
            window.length = policy.window;
            window.count = 0;
        }

        let reset_in = window.length.saturating_sub(now.duration_since(window.started));
        if window.count >= policy.max_requests {
            return Ok(RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_in,
            });
        }

        window.count += 1;
        Ok(RateLimitDecision {
            allowed: true,
            remaining: policy.max_requests - window.count,
            reset_in,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const SIGNUP: RateLimitPolicy = RateLimitPolicy {
        namespace: "ratelimit:signup",
        max_requests: 2,
        window: Duration::from_secs(60),
    };
    const PURCHASE: RateLimitPolicy = RateLimitPolicy {
        namespace: "ratelimit:purchase",
        max_requests: 2,
        window: Duration::from_secs(60),
    };

    #[tokio::test(start_paused = true)]
    async fn blocks_after_max_requests_until_window_resets() {
        let limiter = FixedWindowRateLimiter::default();

        let first = limiter.check("1.2.3.4", &SIGNUP).await.unwrap();
        assert!(first.allowed);
        assert_eq!(first.remaining, 1);
        assert!(limiter.check("1.2.3.4", &SIGNUP).await.unwrap().allowed);

        tokio::time::advance(Duration::from_secs(20)).await;
        let denied = limiter.check("1.2.3.4", &SIGNUP).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_in, Duration::from_secs(40));

        tokio::time::advance(Duration::from_secs(41)).await;
        assert!(limiter.check("1.2.3.4", &SIGNUP).await.unwrap().allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn namespaces_and_identifiers_do_not_share_counters() {
        let limiter = FixedWindowRateLimiter::default();
        for _ in 0..2 {
            limiter.check("7", &SIGNUP).await.unwrap();
        }
        assert!(!limiter.check("7", &SIGNUP).await.unwrap().allowed);
        assert!(limiter.check("7", &PURCHASE).await.unwrap().allowed);
        assert!(limiter.check("8", &SIGNUP).await.unwrap().allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_windows_are_pruned_at_capacity() {
        let limiter = FixedWindowRateLimiter::new(2);
        limiter.check("a", &SIGNUP).await.unwrap();
        limiter.check("b", &SIGNUP).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        limiter.check("c", &SIGNUP).await.unwrap();

        assert_eq!(limiter.tracked_keys().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tracked_keys_never_exceed_the_cap() {
        let limiter = FixedWindowRateLimiter::new(2);
        assert!(limiter.check("a", &SIGNUP).await.unwrap().allowed);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(limiter.check("b", &SIGNUP).await.unwrap().allowed);

        for i in 0..1000 {
            let decision = limiter.check(&format!("spoofed-{}", i), &SIGNUP).await.unwrap();
            assert!(!decision.allowed);
            assert_eq!(decision.reset_in, Duration::from_secs(50));
        }
        assert_eq!(limiter.tracked_keys().await, 2);

        // Keys already tracked keep their own counters.
        assert!(limiter.check("a", &SIGNUP).await.unwrap().allowed);

        // Once the oldest window ends its slot is reused.
        tokio::time::advance(Duration::from_secs(51)).await;
        assert!(limiter.check("c", &SIGNUP).await.unwrap().allowed);
        assert!(limiter.tracked_keys().await <= 2);
    }
}
