//! Response cache keying, hits and expiry.

use std::time::Duration;

use mimir::{CacheConfig, CacheKey, ResponseCache};
use serde_json::json;

#[test]
fn field_order_does_not_change_the_key() {
    let a = CacheKey::new("explain", &json!({ "code": "x = 1", "language": "python" }));
    let b = CacheKey::new("explain", &json!({ "language": "python", "code": "x = 1" }));
    assert_eq!(a, b);
    assert_eq!(a.to_string(), b.to_string());
}

#[test]
fn nested_objects_are_canonicalized() {
    let a = CacheKey::new("improve", &json!({ "opts": { "b": 1, "a": [ { "y": 2, "x": 1 } ] } }));
    let b = CacheKey::new("improve", &json!({ "opts": { "a": [ { "x": 1, "y": 2 } ], "b": 1 } }));
    assert_eq!(a, b);
}

#[test]
fn operation_and_values_separate_keys() {
    let params = json!({ "code": "x" });
    assert_ne!(CacheKey::new("explain", &params), CacheKey::new("improve", &params));
    assert_ne!(
        CacheKey::new("explain", &json!({ "code": "x" })),
        CacheKey::new("explain", &json!({ "code": "y" }))
    );
}

#[test]
fn key_display_is_operation_prefixed() {
    let key = CacheKey::new("generate", &json!({}));
    let shown = key.to_string();
    assert!(shown.starts_with("generate:"));
    // sha256 hex digest
    assert_eq!(shown.len(), "generate:".len() + 64);
}

#[tokio::test]
async fn hit_returns_identical_payload() {
    let cache = ResponseCache::new(&CacheConfig::default());
    let key = CacheKey::new("explain", &json!({ "code": "fn main() {}" }));
    let payload = r#"{"overview":"  spaced\ttext ✓"}"#;

    assert!(cache.get(&key).await.is_none());
    cache.put(&key, payload).await;
    assert_eq!(cache.get(&key).await.as_deref(), Some(payload));
}

#[tokio::test]
async fn expired_entry_is_a_miss() {
    let cache = ResponseCache::new(&CacheConfig::new().ttl(Duration::from_millis(50)));
    let key = CacheKey::new("explain", &json!({ "code": "a" }));
    cache.put(&key, "payload").await;
    assert!(cache.get(&key).await.is_some());

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(cache.get(&key).await.is_none());
}

#[tokio::test]
async fn typed_round_trip_through_json() {
    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Payload {
        steps: Vec<String>,
    }

    let cache = ResponseCache::new(&CacheConfig::default());
    let key = CacheKey::new("explain", &json!({ "code": "b" }));
    let value = Payload {
        steps: vec!["one".into(), "two".into()],
    };
    cache.put_json(&key, &value).await.unwrap();
    assert_eq!(cache.get_json::<Payload>(&key).await, Some(value));
}

#[tokio::test]
async fn sweep_keeps_live_entries() {
    let cache = ResponseCache::new(&CacheConfig::new().sweep_threshold(2));
    let keys: Vec<_> = (0..5)
        .map(|i| CacheKey::new("explain", &json!({ "code": i })))
        .collect();
    for key in &keys {
        cache.put(key, "v").await;
    }
    cache.sweep().await;
    for key in &keys {
        assert!(cache.get(key).await.is_some());
    }
}

#[tokio::test]
async fn clear_evicts_everything() {
    let cache = ResponseCache::new(&CacheConfig::default());
    let key = CacheKey::new("explain", &json!({ "code": "c" }));
    cache.put(&key, "v").await;
    cache.clear();
    assert!(cache.get(&key).await.is_none());
}
