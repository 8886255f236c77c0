// packages/engine/src/events/bus.rs
//! Broadcast bus for pool and supervisor events

use tokio::sync::broadcast;
use tracing::trace;

use super::event::Event;

const DEFAULT_CAPACITY: usize = 256;

/// Thin wrapper over `tokio::sync::broadcast`.
///
/// Publishing never blocks; a subscriber that falls behind its buffer drops
/// the oldest events (it observes `RecvError::Lagged`). The bus is passed to
/// the pool at construction, never reached through a global.
#[derive(Debug, Clone)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Fire-and-forget publish. An event with no subscribers is dropped.
    pub fn publish(&self, event: Event) {
        trace!(kind = ?event.kind, pid = ?event.pid, "event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event::EventKind;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = Bus::default();
        let mut rx = bus.subscribe();

        bus.publish(Event::worker(EventKind::WorkerConstructed, 42));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::WorkerConstructed);
        assert_eq!(event.pid, Some(42));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let bus = Bus::default();
        bus.publish(Event::new(EventKind::PoolConstructed));
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_events() {
        let bus = Bus::new(2);
        let mut rx = bus.subscribe();

        for pid in 0..8 {
            bus.publish(Event::worker(EventKind::WorkerError, pid));
        }

        // The receiver lagged; the oldest events are gone but the stream
        // keeps going.
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(skipped)) => assert!(skipped > 0),
            other => panic!("expected lag, got {:?}", other),
        }
        assert!(rx.recv().await.is_ok());
    }
}
