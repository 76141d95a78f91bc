//! # Runtime events emitted by the request processor and the aggregator.
//!
//! The [`EventKind`] enum classifies event types across three categories:
//! - **Aggregate events**: lifecycle of shared executions (created, joined, evicted, cancelled)
//! - **Source events**: physical calls, failures and scheduled refreshes
//! - **Delivery events**: stash write failures and subscriber trouble
//!
//! The [`Event`] struct carries additional metadata such as timestamps, the
//! aggregation or stash key, reasons and refresh delays.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use stashkit::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::RefreshScheduled)
//!     .with_key("feed/home")
//!     .with_source("feed")
//!     .with_delay(Duration::from_secs(30));
//!
//! assert_eq!(ev.kind, EventKind::RefreshScheduled);
//! assert_eq!(ev.key.as_deref(), Some("feed/home"));
//! assert_eq!(ev.delay_ms, Some(30_000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `source`: subscriber name
    /// - `reason`: panic info/message
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `source`: subscriber name
    /// - `reason`: "full" or "closed"
    SubscriberOverflow,

    // === Aggregate events ===
    /// A new aggregate was registered for a key.
    ///
    /// Sets:
    /// - `key`: aggregation key
    AggregateCreated,

    /// A caller attached to an existing aggregate.
    ///
    /// Sets:
    /// - `key`: aggregation key
    /// - `waiters`: attached callers after the join
    AggregateJoined,

    /// An aggregate was removed from the registry (keep-alive elapsed or teardown).
    ///
    /// Sets:
    /// - `key`: aggregation key
    AggregateEvicted,

    /// The last caller detached while the execution was running; it was cancelled.
    ///
    /// Sets:
    /// - `key`: aggregation key
    AggregateCancelled,

    // === Source events ===
    /// A physical source call started.
    ///
    /// Sets:
    /// - `key`: stash key of the params
    /// - `source`: source name
    SourceCalled,

    /// A physical source call failed.
    ///
    /// Sets:
    /// - `key`, `source`
    /// - `reason`: error label and message
    SourceFailed,

    /// An open-ended aggregate scheduled its next execution.
    ///
    /// Sets:
    /// - `key`: aggregation key
    /// - `delay_ms`: delay until the next execution
    /// - `attempt`: consecutive failures when the delay is a retry backoff
    RefreshScheduled,

    // === Stash events ===
    /// Writing a fetched value to the stash failed; the value was still delivered.
    ///
    /// Sets:
    /// - `key`: stash key
    /// - `reason`: error message
    StashWriteFailed,
}

impl EventKind {
    /// Stable snake_case label for logs.
    pub fn as_label(self) -> &'static str {
        match self {
            EventKind::SubscriberPanicked => "subscriber_panicked",
            EventKind::SubscriberOverflow => "subscriber_overflow",
            EventKind::AggregateCreated => "aggregate_created",
            EventKind::AggregateJoined => "aggregate_joined",
            EventKind::AggregateEvicted => "aggregate_evicted",
            EventKind::AggregateCancelled => "aggregate_cancelled",
            EventKind::SourceCalled => "source_called",
            EventKind::SourceFailed => "source_failed",
            EventKind::RefreshScheduled => "refresh_scheduled",
            EventKind::StashWriteFailed => "stash_write_failed",
        }
    }
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Aggregation or stash key, if applicable.
    pub key: Option<Arc<str>>,
    /// Source or subscriber name, if applicable.
    pub source: Option<Arc<str>>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Refresh delay in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Attached callers after a join.
    pub waiters: Option<u32>,
    /// Consecutive failures for retry refreshes.
    pub attempt: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            key: None,
            source: None,
            reason: None,
            delay_ms: None,
            waiters: None,
            attempt: None,
        }
    }

    /// Attaches a key.
    #[inline]
    pub fn with_key(mut self, key: impl Into<Arc<str>>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Attaches a source or subscriber name.
    #[inline]
    pub fn with_source(mut self, source: impl Into<Arc<str>>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    /// Attaches the number of attached callers.
    #[inline]
    pub fn with_waiters(mut self, n: usize) -> Self {
        self.waiters = Some(u32::try_from(n).unwrap_or(u32::MAX));
        self
    }

    /// Attaches a consecutive-failure count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_source(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_source(subscriber)
            .with_reason(info)
    }

    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_is_monotonic() {
        let a = Event::new(EventKind::SourceCalled);
        let b = Event::new(EventKind::SourceCalled);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn delay_saturates() {
        let ev = Event::new(EventKind::RefreshScheduled).with_delay(Duration::from_secs(u64::MAX));
        assert_eq!(ev.delay_ms, Some(u32::MAX));
    }
}
