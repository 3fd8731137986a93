//! Event Bus (C10).
//!
//! Generalizes the teacher's `proxy::monitor::{ProxyEventBus, ProxyMonitor}`
//! from a single event type (`ProxyRequestLog`) to the closed set of typed
//! events §4.10 names. Two delivery paths are offered:
//!
//! - synchronous, in-process `EventSubscriber`s (for metrics instrumentation
//!   and Fleet State's own reaction to its mutations) — these run inline on
//!   `emit()` and must not block;
//! - a `tokio::sync::broadcast` stream for anything that wants to observe
//!   events asynchronously (the HTTP event-ingress mirror, a future SSE
//!   endpoint). The broadcast channel is bounded and drops the oldest
//!   unread event for a lagging subscriber rather than blocking the
//!   emitter, matching §5's "subscribers must be non-blocking" rule.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::trace;

use orchestrator_types::models::OrchestratorEvent;

/// Implemented by in-process listeners that want synchronous, ordered
/// delivery. Implementations must not block — slow work should hand off to
/// its own task.
pub trait EventSubscriber: Send + Sync {
    fn handle(&self, event: &OrchestratorEvent);
}

const BROADCAST_CAPACITY: usize = 1024;

/// In-process typed event channel. One instance is shared (behind `Arc`)
/// by every component that emits or observes lifecycle events.
pub struct EventBus {
    subscribers: parking_lot::RwLock<Vec<Arc<dyn EventSubscriber>>>,
    broadcast_tx: broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (broadcast_tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        Self { subscribers: parking_lot::RwLock::new(Vec::new()), broadcast_tx }
    }

    pub fn register(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.write().push(subscriber);
    }

    /// Streaming subscription. A lagging receiver skips forward rather than
    /// blocking `emit` (the channel's own drop-oldest semantics).
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Fans an event out to every synchronous subscriber, then to the
    /// broadcast channel. Per §5's ordering guarantee, a given subscriber
    /// observes events in emission order because dispatch here is
    /// single-threaded with respect to this call — callers never emit
    /// concurrently into the same subscriber set without going through
    /// this method.
    pub fn emit(&self, event: OrchestratorEvent) {
        trace!(kind = event.kind(), "event emitted");
        for subscriber in self.subscribers.read().iter() {
            subscriber.handle(&event);
        }
        // No receivers is a normal, common case (nobody streaming yet).
        let _ = self.broadcast_tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use chrono::Utc;

    struct CountingSubscriber(AtomicUsize);

    impl EventSubscriber for CountingSubscriber {
        fn handle(&self, _event: &OrchestratorEvent) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn synchronous_subscribers_receive_every_emit() {
        let bus = EventBus::new();
        let counter = Arc::new(CountingSubscriber(AtomicUsize::new(0)));
        bus.register(counter.clone());

        bus.emit(OrchestratorEvent::ConfigChanged { at: Utc::now() });
        bus.emit(OrchestratorEvent::ConfigChanged { at: Utc::now() });

        assert_eq!(counter.0.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn broadcast_subscriber_observes_emitted_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(OrchestratorEvent::EngineAdded { engine_id: "e1".into(), at: Utc::now() });

        let event = rx.recv().await.expect("event delivered");
        assert_eq!(event.kind(), "engine_added");
    }

    #[test]
    fn no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.emit(OrchestratorEvent::ConfigChanged { at: Utc::now() });
    }
}
