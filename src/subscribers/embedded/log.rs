//! # LogWriter: events as `tracing` records
//!
//! A minimal subscriber that forwards every [`Event`] to `tracing`, at `debug`
//! for lifecycle events and `warn` for failures. Install a `tracing`
//! subscriber (e.g. `tracing-subscriber`) to see the output.
//!
//! ## Example output (fmt layer)
//! ```text
//! DEBUG stashkit: aggregate_created key="user/1"
//! DEBUG stashkit: source_called key="user/1" source="profile"
//! WARN  stashkit: source_failed key="user/1" source="profile" reason="failed: 503"
//! DEBUG stashkit: refresh_scheduled key="feed" delay_ms=30000
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let kind = e.kind.as_label();
        let key = e.key.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::SourceFailed
            | EventKind::StashWriteFailed
            | EventKind::SubscriberOverflow
            | EventKind::SubscriberPanicked => {
                tracing::warn!(target: "stashkit", seq = e.seq, key, source = ?e.source, reason = ?e.reason, "{kind}");
            }
            EventKind::RefreshScheduled => {
                tracing::debug!(target: "stashkit", seq = e.seq, key, delay_ms = ?e.delay_ms, attempt = ?e.attempt, "{kind}");
            }
            EventKind::AggregateJoined => {
                tracing::debug!(target: "stashkit", seq = e.seq, key, waiters = ?e.waiters, "{kind}");
            }
            _ => {
                tracing::debug!(target: "stashkit", seq = e.seq, key, source = ?e.source, "{kind}");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log_writer"
    }
}
