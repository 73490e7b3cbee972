//! Streaming backpressure via bounded channels.
//!
//! Wraps a provider stream in a bounded `tokio::sync::mpsc::channel` so that
//! the producer blocks when the consumer falls behind. Without this, a fast
//! provider can fill unbounded memory while a slow client drains frames.
//!
//! Applied by the orchestrator to every streamed provider call.

use futures_util::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use crate::stream::EventStream;

/// Default number of events buffered between producer and consumer.
pub const DEFAULT_STREAM_BUFFER: usize = 64;

/// Wrap a stream in a bounded channel for backpressure.
///
/// Spawns a producer task that reads from `inner` and sends items through a
/// bounded `mpsc` channel. When the consumer drops the stream the producer
/// drops `inner` at once, even if upstream is idle.
///
/// # Panics
///
/// Requires a tokio runtime context (called within an async fn).
pub fn bounded_stream(inner: EventStream, buffer_size: usize) -> EventStream {
    let (tx, rx) = tokio::sync::mpsc::channel(buffer_size);

    tokio::spawn(async move {
        let mut inner = inner;
        loop {
            let item = tokio::select! {
                item = inner.next() => item,
                _ = tx.closed() => break,
            };
            let Some(item) = item else { break };
            if tx.send(item).await.is_err() {
                break; // receiver dropped
            }
        }
    });

    Box::pin(ReceiverStream::new(rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatEvent;

    #[tokio::test]
    async fn forwards_all_items_in_order() {
        let inner: EventStream = Box::pin(futures_util::stream::iter(vec![
            Ok(ChatEvent::Content("a".into())),
            Ok(ChatEvent::Content("b".into())),
            Ok(ChatEvent::Done),
        ]));
        let items: Vec<_> = bounded_stream(inner, 1).collect().await;
        assert_eq!(items.len(), 3);
        assert!(matches!(&items[0], Ok(ChatEvent::Content(s)) if s == "a"));
        assert!(matches!(&items[2], Ok(ChatEvent::Done)));
    }
}
