//! # Open-ended driver: keeps an aggregate fresh while someone listens.
//!
//! ## Architecture
//! ```text
//! loop {
//!   ├─► execute() ──► Ok(Some(v)) ──► restart log with Next(v)
//!   │             ├─► Ok(None)    ──► keep last value
//!   │             └─► Err(e)      ──► retry policy? ──► backoff.next(failures)
//!   │                                             └─► none ──► Error(e), stop
//!   ├─► delay_until_next_refresh(last) ──► None ──► Completed, stop
//!   ├─► publish RefreshScheduled, sleep(delay)      (cancellable)
//!   └─► park while no caller is attached            (cancellable)
//! }
//! ```
//!
//! ## Rules
//! - Each value starts a fresh log, so a returning caller replays only the latest value.
//! - No execution starts while zero callers are attached; the registry tears
//!   the aggregate down `keep_alive` after the last detach, cancelling the driver.
//! - The failure counter resets after every successful execution.

use std::time::Duration;

use crate::aggregate::aggregable::Refresh;
use crate::aggregate::node::Notification;
use crate::aggregate::registry::{Aggregate, Outcome};
use crate::events::{Bus, Event, EventKind};
use crate::stash::Payload;

/// Runs the refresh loop until completion, terminal failure or cancellation.
pub(crate) async fn drive<T: Payload>(bus: &Bus, aggregate: &Aggregate<T>, refresh: &Refresh<T>) -> Outcome {
    let mut last: Option<T> = None;
    let mut failures: u32 = 0;

    loop {
        let (delay, retrying) = match aggregate.execute().await {
            None => return Outcome::Cancelled,
            Some(Ok(value)) => {
                failures = 0;
                if let Some(value) = value {
                    aggregate.log.restart_with(Notification::Next(value.clone()));
                    last = Some(value);
                }
                (refresh.delay_after(last.as_ref()), false)
            }
            Some(Err(e)) => match refresh.retry {
                Some(backoff) => {
                    let delay = backoff.next(failures);
                    failures = failures.saturating_add(1);
                    tracing::warn!(key = aggregate.key(), error = %e, failures, "refresh failed, retrying");
                    (Some(delay), true)
                }
                None => {
                    aggregate.log.append(Notification::Error(e));
                    return Outcome::Failed;
                }
            },
        };

        let Some(delay) = delay else {
            aggregate.log.append(Notification::Completed);
            return Outcome::Completed;
        };

        publish_scheduled(bus, aggregate.key(), delay, retrying.then_some(failures));

        tokio::select! {
            _ = aggregate.token.cancelled() => return Outcome::Cancelled,
            _ = tokio::time::sleep(delay) => {}
        }
        if !aggregate.wait_for_waiter().await {
            return Outcome::Cancelled;
        }
    }
}

fn publish_scheduled(bus: &Bus, key: &str, delay: Duration, failures: Option<u32>) {
    tracing::debug!(key, ?delay, "refresh scheduled");
    let mut ev = Event::new(EventKind::RefreshScheduled).with_key(key).with_delay(delay);
    if let Some(n) = failures {
        ev = ev.with_attempt(n);
    }
    bus.publish(ev);
}

#[cfg(test)]
mod tests {
    use crate::aggregate::Aggregable;
    use crate::aggregate::node::Notification;
    use crate::aggregate::registry::{Aggregator, Execute};
    use crate::error::SourceError;
    use crate::events::Bus;
    use crate::policies::BackoffPolicy;
    use crate::sources::KeyParams;
    use futures::future::BoxFuture;
    use futures::{FutureExt, StreamExt};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// Execution returning 1, 2, 3, ... and counting calls.
    fn ticking(calls: &Arc<AtomicU32>) -> Execute<u32> {
        let calls = Arc::clone(calls);
        Arc::new(move |_ctx: CancellationToken| -> BoxFuture<'static, Result<Option<u32>, SourceError>> {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(Some(n)) }.boxed()
        })
    }

    fn every_second(keep_alive: Duration) -> Aggregable<KeyParams, u32> {
        Aggregable::by_stash_key()
            .with_keep_alive(keep_alive)
            .open_ended(|_| Some(Duration::from_secs(1)))
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_while_attached() {
        let agg = Aggregator::new(Bus::new(16), Duration::ZERO);
        let calls = Arc::new(AtomicU32::new(0));

        let mut stream = agg.attach("k".into(), every_second(Duration::ZERO).settings(), ticking(&calls));
        assert_eq!(stream.next().await, Some(Notification::Next(1)));
        assert_eq!(stream.next().await, Some(Notification::Next(2)));
        assert_eq!(stream.next().await, Some(Notification::Next(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn no_refresh_after_last_detach() {
        let agg = Aggregator::new(Bus::new(16), Duration::ZERO);
        let calls = Arc::new(AtomicU32::new(0));

        let mut stream = agg.attach("k".into(), every_second(Duration::ZERO).settings(), ticking(&calls));
        assert_eq!(stream.next().await, Some(Notification::Next(1)));
        drop(stream);
        assert!(!agg.contains("k"));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn returning_caller_reuses_warm_aggregate() {
        let agg = Aggregator::new(Bus::new(16), Duration::ZERO);
        let calls = Arc::new(AtomicU32::new(0));
        let aggregable = every_second(Duration::from_secs(30));

        let mut first = agg.attach("k".into(), aggregable.settings(), ticking(&calls));
        assert_eq!(first.next().await, Some(Notification::Next(1)));
        drop(first);

        // Refresh is due after 1s but nobody listens: the driver parks.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(agg.contains("k"));

        let mut back = agg.attach("k".into(), aggregable.settings(), ticking(&calls));
        assert_eq!(back.next().await, Some(Notification::Next(1)));
        assert_eq!(back.next().await, Some(Notification::Next(2)));
        drop(back);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(!agg.contains("k"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn completes_when_delay_is_none() {
        let agg = Aggregator::new(Bus::new(16), Duration::ZERO);
        let calls = Arc::new(AtomicU32::new(0));
        let aggregable: Aggregable<KeyParams, u32> = Aggregable::by_stash_key()
            .open_ended(|last: Option<&u32>| (last.copied() < Some(2)).then_some(Duration::from_secs(1)));

        let out: Vec<_> = agg.attach("k".into(), aggregable.settings(), ticking(&calls)).collect().await;
        assert_eq!(
            out,
            vec![Notification::Next(1), Notification::Next(2), Notification::Completed]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_is_retried_with_backoff() {
        let agg = Aggregator::new(Bus::new(16), Duration::ZERO);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        // Fails on the second call only.
        let exec: Execute<u32> = Arc::new(move |_ctx: CancellationToken| -> BoxFuture<'static, Result<Option<u32>, SourceError>> {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n == 2 {
                    Err(SourceError::failed("flaky"))
                } else {
                    Ok(Some(n))
                }
            }
            .boxed()
        });
        let aggregable = every_second(Duration::ZERO).with_retry(BackoffPolicy::constant(Duration::from_millis(100)));

        let mut stream = agg.attach("k".into(), aggregable.settings(), exec);
        assert_eq!(stream.next().await, Some(Notification::Next(1)));
        assert_eq!(stream.next().await, Some(Notification::Next(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_without_retry_is_terminal() {
        let agg = Aggregator::new(Bus::new(16), Duration::ZERO);
        let exec: Execute<u32> = Arc::new(|_ctx: CancellationToken| -> BoxFuture<'static, Result<Option<u32>, SourceError>> {
            async { Err(SourceError::failed("down")) }.boxed()
        });

        let out: Vec<_> = agg.attach("k".into(), every_second(Duration::ZERO).settings(), exec).collect().await;
        assert_eq!(out, vec![Notification::Error(SourceError::failed("down"))]);
        assert!(!agg.contains("k"));
    }
}
