//! Fixed-window rate limiter behaviour.

use chrono::{TimeDelta, Utc};
use mimir::{RateLimitConfig, RateLimiter};

fn limiter(max: u32, window_ms: u64) -> RateLimiter {
    RateLimiter::new(
        RateLimitConfig::new()
            .max_requests(max)
            .window_ms(window_ms),
    )
}

#[test]
fn nth_plus_one_call_in_window_is_denied() {
    let rl = limiter(5, 60_000);
    let now = Utc::now();
    for i in 0..5 {
        let d = rl.admit_at("alice", now + TimeDelta::milliseconds(i));
        assert!(d.allowed, "call {i} should be admitted");
        assert_eq!(d.remaining, 4 - i as u32);
    }
    let denied = rl.admit_at("alice", now + TimeDelta::milliseconds(10));
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);
    assert!(denied.reset_in_ms > 59_000 && denied.reset_in_ms <= 60_000);
}

#[test]
fn denial_does_not_mutate_window() {
    let rl = limiter(1, 60_000);
    let now = Utc::now();
    rl.admit_at("bob", now);
    let before = rl.window("bob").unwrap();
    for _ in 0..3 {
        assert!(!rl.admit_at("bob", now).allowed);
    }
    assert_eq!(rl.window("bob").unwrap(), before);
    assert_eq!(before.count, 1);
}

#[test]
fn window_expiry_restores_full_capacity() {
    let rl = limiter(2, 1_000);
    let now = Utc::now();
    rl.admit_at("carol", now);
    rl.admit_at("carol", now);
    assert!(!rl.admit_at("carol", now).allowed);

    let later = now + TimeDelta::milliseconds(1_001);
    let d = rl.admit_at("carol", later);
    assert!(d.allowed);
    assert_eq!(d.remaining, 1);
    assert_eq!(rl.window("carol").unwrap().count, 1);
}

#[test]
fn identities_do_not_interact() {
    let rl = limiter(1, 60_000);
    let now = Utc::now();
    assert!(rl.admit_at("a", now).allowed);
    assert!(!rl.admit_at("a", now).allowed);
    assert!(rl.admit_at("b", now).allowed);
}

#[test]
fn retry_after_rounds_up_to_whole_seconds() {
    let rl = limiter(1, 1_500);
    let now = Utc::now();
    rl.admit_at("d", now);
    let denied = rl.admit_at("d", now);
    assert_eq!(denied.reset_in_ms, 1_500);
    assert_eq!(denied.retry_after_secs(), 2);
}

#[test]
fn prune_drops_only_expired_windows() {
    let rl = limiter(5, 1_000);
    let now = Utc::now();
    rl.admit_at("old", now);
    rl.admit_at("new", now + TimeDelta::milliseconds(900));
    let removed = rl.prune_expired(now + TimeDelta::milliseconds(1_500));
    assert_eq!(removed, 1);
    assert!(rl.window("old").is_none());
    assert!(rl.window("new").is_some());
}

#[test]
fn large_maps_are_collected_on_admission() {
    let rl = RateLimiter::new(RateLimitConfig::new().window_ms(10).gc_threshold(3));
    let now = Utc::now();
    for id in ["a", "b", "c"] {
        rl.admit_at(id, now);
    }
    // all three are expired by now; the fourth admission pushes the map over the threshold
    rl.admit_at("d", now + TimeDelta::milliseconds(100));
    assert_eq!(rl.len(), 1);
    assert!(rl.window("d").is_some());
}
