//! Tests for streaming backpressure.
//!
//! Verifies that the bounded channel wrapper applies backpressure to the
//! provider stream when the consumer falls behind, and stops reading
//! upstream once the consumer goes away.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use mimir::providers::bounded_stream;
use mimir::stream::EventStream;
use mimir::{ChatEvent, MimirError};

/// Create a stream that counts how many items have been produced.
fn counting_stream(count: u32, produced: Arc<AtomicU32>) -> EventStream {
    Box::pin(stream::iter((0..count).map(move |i| {
        produced.fetch_add(1, Ordering::SeqCst);
        Ok(ChatEvent::Content(format!("chunk-{i}")))
    })))
}

#[tokio::test]
async fn bounded_stream_delivers_all_items() {
    let produced = Arc::new(AtomicU32::new(0));
    let mut stream = bounded_stream(counting_stream(10, produced.clone()), 4);

    let mut received = 0;
    while let Some(item) = stream.next().await {
        assert!(item.is_ok());
        received += 1;
    }
    assert_eq!(received, 10);
    assert_eq!(produced.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn bounded_stream_propagates_errors() {
    let inner: EventStream = Box::pin(stream::iter(vec![
        Ok(ChatEvent::Content("ok".into())),
        Err(MimirError::Stream("boom".into())),
    ]));
    let items: Vec<_> = bounded_stream(inner, 4).collect().await;
    assert_eq!(items.len(), 2);
    assert!(items[0].is_ok());
    assert!(matches!(items[1], Err(MimirError::Stream(_))));
}

#[tokio::test]
async fn producer_stops_when_consumer_drops() {
    let produced = Arc::new(AtomicU32::new(0));
    let mut stream = bounded_stream(counting_stream(1000, produced.clone()), 4);

    stream.next().await;
    stream.next().await;
    drop(stream);

    // Give the producer task a moment to notice the dropped receiver
    tokio::time::sleep(Duration::from_millis(50)).await;

    let total = produced.load(Ordering::SeqCst);
    assert!(
        total < 20,
        "producer should stop early when consumer drops, but produced {total} items"
    );
}

#[tokio::test]
async fn backpressure_limits_producer_ahead() {
    let produced = Arc::new(AtomicU32::new(0));
    let buffer_size = 4;
    let mut stream = bounded_stream(counting_stream(100, produced.clone()), buffer_size);

    let _ = stream.next().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // consumed 1 + buffer capacity ahead, with some tolerance
    let total = produced.load(Ordering::SeqCst);
    assert!(
        total <= (buffer_size as u32 + 2),
        "producer should be bounded by buffer, but produced {total} items (buffer={buffer_size})"
    );
}

#[tokio::test]
async fn idle_upstream_is_dropped_when_consumer_drops() {
    let alive = Arc::new(());
    let held = alive.clone();
    let inner: EventStream = Box::pin(
        stream::iter(vec![Ok(ChatEvent::Content("first".into()))])
            .chain(stream::pending())
            .map(move |item| {
                let _ = &held;
                item
            }),
    );

    let mut stream = bounded_stream(inner, 4);
    assert!(stream.next().await.is_some());
    drop(stream);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(Arc::strong_count(&alive), 1, "upstream should be dropped");
}
