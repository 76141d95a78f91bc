//! # Event bus shared by one request processor.
//!
//! Every component that observes something worth reporting (a source call,
//! an aggregate being created or evicted, a stash write that failed)
//! publishes an [`Event`] here. The bus never blocks a request: publishing is
//! a `broadcast::Sender::send` whose result is ignored.
//!
//! ```text
//! SourceProcessor ── SourceCalled / SourceFailed ──────────────┐
//! Aggregator ─────── AggregateCreated / Joined / Evicted ──────┤
//! open-ended driver ─ RefreshScheduled ────────────────────────┼──► Bus ──► listener ──► SubscriberSet
//! RequestProcessor ── StashWriteFailed ────────────────────────┤            (only with subscribers)
//! SubscriberSet ───── SubscriberOverflow / SubscriberPanicked ─┘
//! RequestProcessor::events() ─────────────────────────────────────► ad-hoc receivers (tests, tooling)
//! ```
//!
//! Capacity comes from `Config::bus_capacity`. A receiver that falls behind
//! by more than that skips the oldest events (`RecvError::Lagged`); events
//! published while nobody listens are gone.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for runtime events.
///
/// Cheap to clone; every clone publishes into the same channel.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all active receivers.
    ///
    /// Without receivers the event is dropped; this still returns immediately.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a new receiver that will observe subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn lagging_receiver_skips_oldest_events() {
        let bus = Bus::new(2);
        let mut rx = bus.subscribe();
        for key in ["a", "b", "c"] {
            bus.publish(Event::new(EventKind::SourceCalled).with_key(key));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        ));
        assert_eq!(rx.recv().await.unwrap().key.as_deref(), Some("b"));
        assert_eq!(rx.recv().await.unwrap().key.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn receivers_see_events_published_after_subscribe() {
        let bus = Bus::new(0);
        bus.publish(Event::new(EventKind::SourceCalled));

        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::AggregateCreated).with_key("k"));
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::AggregateCreated);
        assert_eq!(ev.key.as_deref(), Some("k"));
    }
}
