//! # Replay-latest delivery.
//!
//! Turns an aggregate's [`NotificationLog`](super::node) into one stream per
//! attached caller. Every caller keeps its own marker (the `seq` of the last
//! node it delivered); whenever the log changes it walks from the latest node
//! back to that marker and yields the backlog in order.
//!
//! ```text
//! watch::Receiver ──changed()──► latest.since(marker) ──► yield n1, n2, ... ──► marker = latest.seq
//! ```
//!
//! ## Rules
//! - A caller attaching late sees the whole current chain before any live event.
//! - A caller that is caught up does no work until the next change.
//! - The stream ends right after a terminal notification.
//! - A terminal notification appended less than `spacing` after the last
//!   value is held back until `spacing` has passed; only the caller waits,
//!   never the emitter.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::aggregate::node::{Notification, NotificationNode};
use crate::error::SourceError;
use crate::stash::Payload;

/// Per-caller stream over the log behind `rx`.
pub(crate) fn replay<T: Payload>(
    mut rx: watch::Receiver<Arc<NotificationNode<T>>>,
    spacing: Duration,
) -> impl Stream<Item = Notification<T>> + Send + 'static {
    async_stream::stream! {
        let mut marker = 0u64;
        let mut last_value_at: Option<Instant> = None;

        loop {
            let latest = Arc::clone(&rx.borrow_and_update());
            let backlog: Vec<(Notification<T>, Instant)> = latest
                .since(marker)
                .into_iter()
                .filter_map(|node| node.notification().cloned().map(|n| (n, node.at())))
                .collect();
            marker = latest.seq();
            drop(latest);

            for (notification, at) in backlog {
                if notification.is_terminal() {
                    if let Some(value_at) = last_value_at {
                        let due = value_at + spacing;
                        if Instant::now() < due {
                            tokio::time::sleep_until(due).await;
                        }
                    }
                    yield notification;
                    return;
                }
                last_value_at = Some(at);
                yield notification;
            }

            if rx.changed().await.is_err() {
                // Log dropped without a terminal notification.
                yield Notification::Error(SourceError::Cancelled);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::node::NotificationLog;
    use futures::StreamExt;

    #[tokio::test(start_paused = true)]
    async fn late_subscriber_gets_backlog_then_live_events() {
        let log = NotificationLog::<u32>::new();
        log.append(Notification::Next(1));
        log.append(Notification::Next(2));
        log.append(Notification::Next(3));

        let mut late = Box::pin(replay(log.subscribe(), Duration::ZERO));
        assert_eq!(late.next().await, Some(Notification::Next(1)));
        assert_eq!(late.next().await, Some(Notification::Next(2)));
        assert_eq!(late.next().await, Some(Notification::Next(3)));

        log.append(Notification::Next(4));
        log.append(Notification::Completed);
        assert_eq!(late.next().await, Some(Notification::Next(4)));
        assert_eq!(late.next().await, Some(Notification::Completed));
        assert_eq!(late.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn every_subscriber_sees_the_same_sequence() {
        let log = Arc::new(NotificationLog::<u32>::new());
        let early = replay(log.subscribe(), Duration::ZERO);

        let writer = {
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                for i in 0..5 {
                    log.append(Notification::Next(i));
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                log.append(Notification::Completed);
            })
        };

        tokio::time::sleep(Duration::from_millis(25)).await;
        let late = replay(log.subscribe(), Duration::ZERO);

        let (a, b): (Vec<_>, Vec<_>) = tokio::join!(early.collect(), late.collect());
        writer.await.unwrap();

        let expected: Vec<_> = (0..5).map(Notification::Next).chain([Notification::Completed]).collect();
        assert_eq!(a, expected);
        assert_eq!(b, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_right_after_value_is_spaced() {
        let log = NotificationLog::<u32>::new();
        log.append(Notification::Next(7));
        log.append(Notification::Completed);

        let started = Instant::now();
        let out: Vec<_> = replay(log.subscribe(), Duration::from_millis(20)).collect().await;
        assert_eq!(out, vec![Notification::Next(7), Notification::Completed]);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_long_after_value_is_not_delayed() {
        let log = NotificationLog::<u32>::new();
        log.append(Notification::Next(7));
        tokio::time::sleep(Duration::from_secs(1)).await;
        log.append(Notification::Error(SourceError::failed("late")));

        let started = Instant::now();
        let out: Vec<_> = replay(log.subscribe(), Duration::from_millis(20)).collect().await;
        assert_eq!(out.len(), 2);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn dropped_log_ends_with_cancellation() {
        let log = NotificationLog::<u32>::new();
        let rx = log.subscribe();
        log.append(Notification::Next(1));
        drop(log);

        let out: Vec<_> = replay(rx, Duration::ZERO).collect().await;
        assert_eq!(out, vec![Notification::Next(1), Notification::Error(SourceError::Cancelled)]);
    }
}
