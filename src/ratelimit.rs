//! Per-identity fixed-window admission control.
//!
//! Each identity owns a [`RateWindow`]: a request count and the instant the
//! window resets. The first request (or the first after expiry) opens a new
//! window with `count = 1`; later requests inside the window increment the
//! count until `max_requests` is reached, after which they are denied without
//! touching the stored state.
//!
//! Windows live in a [`DashMap`] so concurrent requests for different
//! identities never contend. Expired windows are pruned lazily once the map
//! grows past `gc_threshold`.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::telemetry;

/// Configuration for the rate limiter.
///
/// ```rust
/// # use mimir::RateLimitConfig;
/// let config = RateLimitConfig::new().window_ms(30_000).max_requests(10);
/// assert_eq!(config.max_requests, 10);
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Window length in milliseconds. Default: 60,000.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Requests admitted per window. Default: 5.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    /// Map size above which expired windows are pruned. Default: 10,000.
    #[serde(default = "default_gc_threshold")]
    pub gc_threshold: usize,
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_max_requests() -> u32 {
    5
}

fn default_gc_threshold() -> usize {
    10_000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_requests: default_max_requests(),
            gc_threshold: default_gc_threshold(),
        }
    }
}

impl RateLimitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the window length in milliseconds.
    pub fn window_ms(mut self, ms: u64) -> Self {
        self.window_ms = ms;
        self
    }

    /// Set the number of requests admitted per window.
    pub fn max_requests(mut self, n: u32) -> Self {
        self.max_requests = n;
        self
    }

    /// Set the map size that triggers pruning of expired windows.
    pub fn gc_threshold(mut self, n: usize) -> Self {
        self.gc_threshold = n;
        self
    }
}

/// Admission state for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub reset_in_ms: u64,
}

impl RateDecision {
    /// Time until the window resets.
    pub fn reset_in(&self) -> Duration {
        Duration::from_millis(self.reset_in_ms)
    }

    /// Whole seconds a denied caller should wait, rounded up.
    pub fn retry_after_secs(&self) -> u64 {
        self.reset_in_ms.div_ceil(1000)
    }
}

/// Fixed-window rate limiter keyed by identity.
pub struct RateLimiter {
    windows: DashMap<String, RateWindow>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admit (or deny) a request for `identity` at the current time.
    pub fn admit(&self, identity: &str) -> RateDecision {
        self.admit_at(identity, Utc::now())
    }

    /// Admit (or deny) a request for `identity` as of `now`.
    pub fn admit_at(&self, identity: &str, now: DateTime<Utc>) -> RateDecision {
        let limit = self.config.max_requests;
        let window = TimeDelta::milliseconds(self.config.window_ms as i64);

        let (allowed, state) = match self.windows.entry(identity.to_string()) {
            Entry::Vacant(vacant) => {
                let fresh = RateWindow {
                    count: 1,
                    reset_at: now + window,
                };
                vacant.insert(fresh);
                (true, fresh)
            }
            Entry::Occupied(mut occupied) => {
                let current = occupied.get_mut();
                if now > current.reset_at {
                    *current = RateWindow {
                        count: 1,
                        reset_at: now + window,
                    };
                    (true, *current)
                } else if current.count < limit {
                    current.count += 1;
                    (true, *current)
                } else {
                    (false, *current)
                }
            }
        };

        if self.windows.len() > self.config.gc_threshold {
            self.prune_expired(now);
        }

        let reset_in_ms = (state.reset_at - now).num_milliseconds().max(0) as u64;
        let decision = RateDecision {
            allowed: allowed && state.count <= limit,
            limit,
            remaining: limit.saturating_sub(state.count),
            reset_at: state.reset_at,
            reset_in_ms,
        };

        if decision.allowed {
            debug!(identity, remaining = decision.remaining, "request admitted");
        } else {
            metrics::counter!(telemetry::RATE_LIMITED_TOTAL).increment(1);
            warn!(identity, reset_in_ms, "rate limit exceeded");
        }
        decision
    }

    /// Current window for an identity, if one exists.
    pub fn window(&self, identity: &str) -> Option<RateWindow> {
        self.windows.get(identity).map(|w| *w)
    }

    /// Drop every window whose reset time has passed. Returns the number removed.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, w| w.reset_at >= now);
        before.saturating_sub(self.windows.len())
    }

    /// Number of tracked identities.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig::new().max_requests(max).window_ms(60_000))
    }

    #[test]
    fn first_request_opens_window() {
        let rl = limiter(5);
        let now = Utc::now();
        let d = rl.admit_at("alice", now);
        assert!(d.allowed);
        assert_eq!(d.remaining, 4);
        assert_eq!(d.reset_in_ms, 60_000);
        assert_eq!(rl.window("alice").unwrap().count, 1);
    }

    #[test]
    fn denial_does_not_mutate_window() {
        let rl = limiter(2);
        let now = Utc::now();
        rl.admit_at("bob", now);
        rl.admit_at("bob", now);
        let denied = rl.admit_at("bob", now);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(rl.window("bob").unwrap().count, 2);
    }

    #[test]
    fn denial_reports_time_to_reset() {
        let rl = limiter(1);
        let now = Utc::now();
        rl.admit_at("carol", now);
        let denied = rl.admit_at("carol", now + TimeDelta::milliseconds(59_500));
        assert!(!denied.allowed);
        assert_eq!(denied.reset_in_ms, 500);
        assert_eq!(denied.retry_after_secs(), 1);
    }

    #[test]
    fn prune_removes_only_expired() {
        let rl = limiter(5);
        let now = Utc::now();
        rl.admit_at("old", now);
        rl.admit_at("new", now + TimeDelta::seconds(90));
        let removed = rl.prune_expired(now + TimeDelta::seconds(100));
        assert_eq!(removed, 1);
        assert!(rl.window("old").is_none());
        assert!(rl.window("new").is_some());
    }

    #[test]
    fn gc_threshold_triggers_pruning() {
        let rl = RateLimiter::new(RateLimitConfig::new().gc_threshold(2));
        let now = Utc::now();
        rl.admit_at("a", now);
        rl.admit_at("b", now);
        rl.admit_at("c", now + TimeDelta::minutes(5));
        assert_eq!(rl.len(), 1);
        assert!(rl.window("c").is_some());
    }
}
