//! # Per-subscriber queues for processor events.
//!
//! The listener spawned by `ProcessorBuilder::build` hands every bus event to
//! [`SubscriberSet::emit`]. Each subscriber owns a bounded queue drained by
//! its own worker task, so a slow metrics exporter never delays a request or
//! another subscriber.
//!
//! ```text
//! listener ─► emit(event) ─┬─► queue(log_writer) ─► worker ─► on_event
//!                          └─► queue(metrics)    ─► worker ─► on_event
//!                                 full? ─► drop for this subscriber, SubscriberOverflow
//!                                 panic? ─► SubscriberPanicked, worker continues
//! ```
//!
//! Ordering holds per subscriber. Overflow events are never re-reported, which
//! keeps a saturated subscriber from feeding its own queue.

use std::sync::Arc;

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::events::{Bus, Event};
use crate::subscribers::Subscribe;

struct Queue {
    name: &'static str,
    sender: mpsc::Sender<Arc<Event>>,
}

/// Fan-out coordinator for multiple event subscribers.
pub struct SubscriberSet {
    queues: Vec<Queue>,
    workers: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl SubscriberSet {
    /// Creates a new set and spawns one worker task per subscriber.
    ///
    /// Must be called inside a tokio runtime. Queue capacity is at least 1.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Self {
        let mut queues = Vec::with_capacity(subs.len());
        let mut workers = Vec::with_capacity(subs.len());

        for sub in subs {
            let name = sub.name();
            let (tx, mut rx) = mpsc::channel::<Arc<Event>>(sub.queue_capacity().max(1));
            let worker_bus = bus.clone();

            let handle = tokio::spawn(async move {
                while let Some(ev) = rx.recv().await {
                    let fut = sub.on_event(ev.as_ref());
                    if let Err(panic_err) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                        let info = panic_message(panic_err.as_ref());
                        tracing::error!(subscriber = name, panic = %info, "subscriber panicked");
                        worker_bus.publish(Event::subscriber_panicked(name, info));
                    }
                }
            });
            queues.push(Queue { name, sender: tx });
            workers.push(handle);
        }
        Self { queues, workers, bus }
    }

    /// Number of subscribers.
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    /// True if there are no subscribers.
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Queues `event` for every subscriber without waiting.
    pub fn emit(&self, event: Event) {
        let report = !event.is_subscriber_overflow();
        let event = Arc::new(event);

        for queue in &self.queues {
            let reason = match queue.sender.try_send(Arc::clone(&event)) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "full",
                Err(mpsc::error::TrySendError::Closed(_)) => "closed",
            };
            tracing::warn!(subscriber = queue.name, reason, kind = event.kind.as_label(), "event dropped");
            if report {
                self.bus.publish(Event::subscriber_overflow(queue.name, reason));
            }
        }
    }

    /// Closes every queue and waits for the workers to drain them.
    pub async fn shutdown(self) {
        drop(self.queues);
        for h in self.workers {
            let _ = h.await;
        }
    }
}

fn panic_message(any: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = any.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = any.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<EventKind>>,
    }

    #[async_trait]
    impl Subscribe for Recorder {
        async fn on_event(&self, ev: &Event) {
            self.seen.lock().push(ev.kind);
        }
    }

    struct Panicker;

    #[async_trait]
    impl Subscribe for Panicker {
        async fn on_event(&self, _ev: &Event) {
            panic!("boom");
        }
        fn name(&self) -> &'static str {
            "panicker"
        }
    }

    /// Subscriber with a one-slot queue.
    struct Slow;

    #[async_trait]
    impl Subscribe for Slow {
        async fn on_event(&self, _ev: &Event) {}
        fn name(&self) -> &'static str {
            "slow"
        }
        fn queue_capacity(&self) -> usize {
            1
        }
    }

    #[tokio::test]
    async fn full_queue_reports_overflow_once_per_dropped_event() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let set = SubscriberSet::new(vec![Arc::new(Slow) as Arc<dyn Subscribe>], bus);

        // Workers have not run yet: the second and third events find the queue full.
        set.emit(Event::new(EventKind::SourceCalled));
        set.emit(Event::new(EventKind::SourceCalled));
        set.emit(Event::new(EventKind::SourceCalled));

        for _ in 0..2 {
            let ev = rx.recv().await.unwrap();
            assert!(ev.is_subscriber_overflow());
            assert_eq!(ev.source.as_deref(), Some("slow"));
            assert_eq!(ev.reason.as_deref(), Some("full"));
        }

        // Overflow events are not re-reported.
        set.emit(Event::subscriber_overflow("slow", "full"));
        set.shutdown().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn delivers_in_order_and_isolates_panics() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let recorder = Arc::new(Recorder::default());
        let subs: Vec<Arc<dyn Subscribe>> = vec![recorder.clone(), Arc::new(Panicker)];
        let set = SubscriberSet::new(subs, bus);

        set.emit(Event::new(EventKind::SourceCalled));
        set.emit(Event::new(EventKind::AggregateEvicted));

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::SubscriberPanicked);
        assert_eq!(ev.source.as_deref(), Some("panicker"));
        assert_eq!(ev.reason.as_deref(), Some("boom"));

        set.shutdown().await;
        assert_eq!(
            *recorder.seen.lock(),
            vec![EventKind::SourceCalled, EventKind::AggregateEvicted]
        );
    }
}
