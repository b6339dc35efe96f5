//! # Sliding-Window Rate Limiter
//!
//! In-memory admission gate protecting the pipeline's entry point. Each
//! client key owns an ordered queue of request timestamps; a request is
//! allowed when fewer than `limit` timestamps remain inside the trailing
//! window after lazy eviction.
//!
//! ## Key Behaviors:
//! - **Lazy eviction**: expired timestamps are dropped on read, not by a timer
//! - **Two composed tiers**: a global per-client limit plus a stricter
//!   per-route limit for expensive endpoints; both must pass
//! - **Bounded memory**: a periodic reaper purges keys idle for over an hour

use crate::config::RateLimitConfig;
use crate::error::{AppError, AppResult};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Keys whose newest timestamp is older than this are dropped by the reaper.
const IDLE_PURGE_AFTER: Duration = Duration::from_secs(3600);

/// Outcome of a single rate-limit check.
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests left in the window after this one (0 when rejected)
    pub remaining: u32,
    /// When the client's window frees up: the oldest retained timestamp
    /// plus the window length
    pub reset_at: Instant,
}

impl RateDecision {
    /// Seconds until `reset_at`, saturating at zero.
    pub fn retry_after_secs(&self, now: Instant) -> u64 {
        self.reset_at.saturating_duration_since(now).as_secs()
    }
}

/// Simple in-memory sliding-window rate limiter.
///
/// All state lives behind one mutex; every operation is a short
/// lock-mutate-unlock region, matching the per-component locking model of
/// the rest of the pipeline.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Derive the client identity used as the rate-limit key.
    ///
    /// Preference order: forwarded-address header (first hop), real-address
    /// header, then the peer address.
    pub fn client_key(
        forwarded_for: Option<&str>,
        real_ip: Option<&str>,
        peer_addr: &str,
    ) -> String {
        let ip = forwarded_for
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .or(real_ip)
            .unwrap_or(peer_addr);
        format!("ip:{}", ip)
    }

    /// Check whether a request is allowed under `limit` per `window`.
    pub fn is_allowed(&self, key: &str, limit: u32, window: Duration) -> RateDecision {
        self.check_at(key, limit, window, Instant::now())
    }

    /// Clock-injected variant of [`is_allowed`](Self::is_allowed); `now`
    /// must be monotonically non-decreasing across calls for a given key.
    pub fn check_at(&self, key: &str, limit: u32, window: Duration, now: Instant) -> RateDecision {
        let mut windows = self.windows.lock().unwrap();
        let queue = windows.entry(key.to_string()).or_default();

        // Evict timestamps that fell out of the trailing window
        if let Some(cutoff) = now.checked_sub(window) {
            while let Some(&front) = queue.front() {
                if front < cutoff {
                    queue.pop_front();
                } else {
                    break;
                }
            }
        }

        let current = queue.len() as u32;

        if current >= limit {
            // Full window: the client must wait until the oldest retained
            // request ages out
            let reset_at = queue.front().map(|&t| t + window).unwrap_or(now + window);
            return RateDecision {
                allowed: false,
                remaining: 0,
                reset_at,
            };
        }

        queue.push_back(now);

        RateDecision {
            allowed: true,
            remaining: limit - current - 1,
            reset_at: now + window,
        }
    }

    /// Apply both tiers for a transcription-class request: the global
    /// per-client limit, then the stricter per-route limit. Both must pass.
    pub fn check_request(
        &self,
        config: &RateLimitConfig,
        client_key: &str,
        route: &str,
        route_limit: u32,
        route_window_secs: u64,
    ) -> AppResult<()> {
        if !config.enabled {
            return Ok(());
        }

        let now = Instant::now();

        let global = self.check_at(
            &format!("global:{}", client_key),
            config.global_limit,
            Duration::from_secs(config.global_window_secs),
            now,
        );
        if !global.allowed {
            return Err(AppError::RateLimited {
                message: format!(
                    "Too many requests. Global limit: {} per {} seconds",
                    config.global_limit, config.global_window_secs
                ),
                retry_after_secs: global.retry_after_secs(now),
            });
        }

        let per_route = self.check_at(
            &format!("{}:{}", route, client_key),
            route_limit,
            Duration::from_secs(route_window_secs),
            now,
        );
        if !per_route.allowed {
            return Err(AppError::RateLimited {
                message: format!(
                    "Too many requests. Limit: {} per {} seconds",
                    route_limit, route_window_secs
                ),
                retry_after_secs: per_route.retry_after_secs(now),
            });
        }

        Ok(())
    }

    /// Drop keys whose queues contain nothing newer than [`IDLE_PURGE_AFTER`].
    /// Called by the janitor to bound memory; returns the number of keys
    /// removed.
    pub fn purge_idle(&self) -> usize {
        let mut windows = self.windows.lock().unwrap();
        let now = Instant::now();

        let before = windows.len();
        windows.retain(|_, queue| {
            if let Some(cutoff) = now.checked_sub(IDLE_PURGE_AFTER) {
                while let Some(&front) = queue.front() {
                    if front < cutoff {
                        queue.pop_front();
                    } else {
                        break;
                    }
                }
            }
            !queue.is_empty()
        });
        let removed = before - windows.len();

        if removed > 0 {
            tracing::debug!("Rate limiter purged {} idle client keys", removed);
        }

        removed
    }

    /// Number of client keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().unwrap().len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_limit() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        let window = Duration::from_secs(60);

        for i in 0..5 {
            let decision = limiter.check_at("ip:1.2.3.4", 5, window, now);
            assert!(decision.allowed, "request {} should be allowed", i);
            assert_eq!(decision.remaining, 4 - i);
        }
    }

    #[test]
    fn test_rejects_over_limit_with_reset_from_oldest() {
        let limiter = RateLimiter::new();
        let first = Instant::now();
        let window = Duration::from_secs(60);

        // L requests inside the window, then the (L+1)-th is rejected
        for i in 0..3u64 {
            let at = first + Duration::from_secs(i);
            assert!(limiter.check_at("ip:1.2.3.4", 3, window, at).allowed);
        }

        let rejected = limiter.check_at("ip:1.2.3.4", 3, window, first + Duration::from_secs(3));
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        // Reset time is the first request's timestamp plus the window
        assert_eq!(rejected.reset_at, first + window);
    }

    #[test]
    fn test_window_slides() {
        let limiter = RateLimiter::new();
        let first = Instant::now();
        let window = Duration::from_secs(10);

        assert!(limiter.check_at("k", 1, window, first).allowed);
        assert!(!limiter.check_at("k", 1, window, first + Duration::from_secs(5)).allowed);
        // Once the first timestamp ages out, the key is admitted again
        assert!(limiter.check_at("k", 1, window, first + Duration::from_secs(11)).allowed);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        let window = Duration::from_secs(60);

        assert!(limiter.check_at("ip:a", 1, window, now).allowed);
        assert!(!limiter.check_at("ip:a", 1, window, now).allowed);
        assert!(limiter.check_at("ip:b", 1, window, now).allowed);
    }

    #[test]
    fn test_client_key_preference_order() {
        assert_eq!(
            RateLimiter::client_key(Some("10.0.0.1, 10.0.0.2"), Some("10.0.0.3"), "10.0.0.4"),
            "ip:10.0.0.1"
        );
        assert_eq!(
            RateLimiter::client_key(None, Some("10.0.0.3"), "10.0.0.4"),
            "ip:10.0.0.3"
        );
        assert_eq!(RateLimiter::client_key(None, None, "10.0.0.4"), "ip:10.0.0.4");
    }

    #[test]
    fn test_two_tier_composition() {
        let limiter = RateLimiter::new();
        let config = RateLimitConfig {
            enabled: true,
            global_limit: 100,
            global_window_secs: 3600,
            transcribe_limit: 2,
            transcribe_window_secs: 3600,
            status_limit: 60,
            status_window_secs: 3600,
        };

        // The stricter route tier trips long before the global tier
        assert!(limiter
            .check_request(&config, "ip:x", "transcribe", 2, 3600)
            .is_ok());
        assert!(limiter
            .check_request(&config, "ip:x", "transcribe", 2, 3600)
            .is_ok());
        let err = limiter
            .check_request(&config, "ip:x", "transcribe", 2, 3600)
            .unwrap_err();
        assert!(matches!(err, AppError::RateLimited { .. }));
    }

    #[test]
    fn test_disabled_limiter_always_passes() {
        let limiter = RateLimiter::new();
        let config = RateLimitConfig {
            enabled: false,
            global_limit: 1,
            global_window_secs: 3600,
            transcribe_limit: 1,
            transcribe_window_secs: 3600,
            status_limit: 1,
            status_window_secs: 3600,
        };

        for _ in 0..10 {
            assert!(limiter.check_request(&config, "ip:x", "transcribe", 1, 3600).is_ok());
        }
    }

    #[test]
    fn test_purge_drops_only_idle_keys() {
        let limiter = RateLimiter::new();
        let window = Duration::from_secs(60);

        // A key whose entries are all ancient, and a fresh key
        if let Some(old) = Instant::now().checked_sub(Duration::from_secs(7200)) {
            limiter.check_at("stale", 5, window, old);
        }
        limiter.is_allowed("fresh", 5, window);

        limiter.purge_idle();
        assert_eq!(limiter.tracked_keys(), 1);
    }
}
