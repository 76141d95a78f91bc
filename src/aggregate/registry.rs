//! # Aggregation registry: at most one physical execution per key.
//!
//! The registry maps aggregation keys to live [`Aggregate`]s. Every caller
//! attaches to the aggregate for its key and receives a replayed stream of
//! its notifications; the first attach starts the execution.
//!
//! ## Architecture
//! ```text
//! attach(key) ──► lock ──► lookup-or-create ──► waiters += 1 ──► unlock
//!                                                  │
//!                     first attach? ──► spawn execution (single-shot or open-ended driver)
//!                                                  │
//!                         caller ◄── replay(log) ◄─┘
//!
//! execution done ──► keep_alive == 0 / failed && !keep_alive_on_error ──► evict now
//!                └─► otherwise ──► sleep(keep_alive) ──► evict
//!
//! drop(stream) ──► lock ──► waiters -= 1 ──► last one and still running?
//!                                             ├─ single-shot ──► evict, cancel, Error(Cancelled)
//!                                             └─ open-ended  ──► teardown after keep_alive
//! ```
//!
//! ## Rules
//! - Lookup-or-create, attach, detach and removal run inside one critical
//!   section (`parking_lot::Mutex`, also taken from `Drop`).
//! - An aggregate in the map is joinable; it is marked closed exactly when removed.
//! - Eviction only removes the entry if it still points at the same aggregate.
//! - Detaching is idempotent; cancellation races harmlessly with completion
//!   (the log ignores appends after a terminal notification).

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::aggregate::aggregable::Settings;
use crate::aggregate::node::{Notification, NotificationLog};
use crate::aggregate::open_ended;
use crate::aggregate::replay::replay;
use crate::error::SourceError;
use crate::events::{Bus, Event, EventKind};
use crate::stash::Payload;

/// Starts one physical execution.
pub(crate) type Execute<T> =
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<Option<T>, SourceError>> + Send + Sync>;

/// How an execution (or an open-ended driver) ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Completed,
    Failed,
    Cancelled,
}

/// One shared execution and its notification log.
pub(crate) struct Aggregate<T> {
    key: Arc<str>,
    pub(crate) log: NotificationLog<T>,
    execute: Execute<T>,
    pub(crate) settings: Settings<T>,
    pub(crate) token: CancellationToken,
    /// Mutated only under the registry lock.
    waiters: AtomicUsize,
    started: AtomicBool,
    closed: AtomicBool,
    attached: Notify,
    teardown: Mutex<Option<CancellationToken>>,
}

impl<T: Payload> Aggregate<T> {
    fn new(key: &str, settings: Settings<T>, execute: Execute<T>) -> Self {
        Self {
            key: Arc::from(key),
            log: NotificationLog::new(),
            execute,
            settings,
            token: CancellationToken::new(),
            waiters: AtomicUsize::new(0),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            attached: Notify::new(),
            teardown: Mutex::new(None),
        }
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn waiters(&self) -> usize {
        self.waiters.load(Ordering::Acquire)
    }

    /// Runs the execution once. `None` if the aggregate was cancelled meanwhile.
    pub(crate) async fn execute(&self) -> Option<Result<Option<T>, SourceError>> {
        let fut = AssertUnwindSafe((self.execute)(self.token.child_token())).catch_unwind();
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            res = fut => Some(res.unwrap_or_else(|_| {
                tracing::error!(key = %self.key, "source panicked");
                Err(SourceError::Panicked)
            })),
        }
    }

    /// Parks until at least one caller is attached. `false` if cancelled.
    pub(crate) async fn wait_for_waiter(&self) -> bool {
        while self.waiters() == 0 {
            tokio::select! {
                _ = self.token.cancelled() => return false,
                _ = self.attached.notified() => {}
            }
        }
        !self.token.is_cancelled()
    }

    fn cancel_teardown(&self) {
        if let Some(timer) = self.teardown.lock().take() {
            timer.cancel();
        }
    }

    fn is_open_ended(&self) -> bool {
        self.settings.refresh.is_some()
    }
}

struct Shared<T> {
    aggregates: Mutex<HashMap<String, Arc<Aggregate<T>>>>,
    bus: Bus,
    spacing: Duration,
}

/// Registry of live aggregates for one payload type.
pub(crate) struct Aggregator<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Aggregator<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Payload> Aggregator<T> {
    /// Creates an empty registry. `spacing` is the terminal spacing of replayed streams.
    pub(crate) fn new(bus: Bus, spacing: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                aggregates: Mutex::new(HashMap::new()),
                bus,
                spacing,
            }),
        }
    }

    /// Number of registered aggregates.
    pub(crate) fn len(&self) -> usize {
        self.shared.aggregates.lock().len()
    }

    /// True if `key` has a registered aggregate.
    pub(crate) fn contains(&self, key: &str) -> bool {
        self.shared.aggregates.lock().contains_key(key)
    }

    /// Attaches a caller to the aggregate for `key`, creating it if needed.
    ///
    /// `settings` and `execute` are only used when a new aggregate is created.
    /// Dropping the returned stream detaches the caller.
    pub(crate) fn attach(&self, key: String, settings: Settings<T>, execute: Execute<T>) -> AggregateStream<T> {
        self.shared.attach(key, settings, execute)
    }
}

impl<T: Payload> Shared<T> {
    fn attach(self: &Arc<Self>, key: String, settings: Settings<T>, execute: Execute<T>) -> AggregateStream<T> {
        let (aggregate, created, waiters, start) = {
            let mut map = self.aggregates.lock();
            let (aggregate, created) = match map.get(&key) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let aggregate = Arc::new(Aggregate::new(&key, settings, execute));
                    map.insert(key, Arc::clone(&aggregate));
                    (aggregate, true)
                }
            };
            let waiters = aggregate.waiters.fetch_add(1, Ordering::AcqRel) + 1;
            aggregate.cancel_teardown();
            let start = !aggregate.started.swap(true, Ordering::AcqRel);
            (aggregate, created, waiters, start)
        };

        if created {
            tracing::debug!(key = aggregate.key(), "aggregate created");
            self.bus.publish(Event::new(EventKind::AggregateCreated).with_key(aggregate.key()));
        } else {
            tracing::debug!(key = aggregate.key(), waiters, "aggregate joined");
            self.bus.publish(
                Event::new(EventKind::AggregateJoined)
                    .with_key(aggregate.key())
                    .with_waiters(waiters),
            );
        }

        if start {
            self.spawn_execution(&aggregate);
        } else {
            aggregate.attached.notify_one();
        }

        let inner = replay(aggregate.log.subscribe(), self.spacing).boxed();
        AggregateStream {
            inner,
            _attachment: Attachment {
                shared: Arc::clone(self),
                aggregate,
                detached: AtomicBool::new(false),
            },
        }
    }

    fn spawn_execution(self: &Arc<Self>, aggregate: &Arc<Aggregate<T>>) {
        let shared = Arc::clone(self);
        let aggregate = Arc::clone(aggregate);
        tokio::spawn(async move {
            let outcome = match aggregate.settings.refresh.clone() {
                Some(refresh) => open_ended::drive(&shared.bus, &aggregate, &refresh).await,
                None => run_once(&aggregate).await,
            };
            match outcome {
                Outcome::Completed => shared.finished(&aggregate, false),
                Outcome::Failed => shared.finished(&aggregate, true),
                Outcome::Cancelled => {}
            }
        });
    }

    /// Schedules eviction of a finished aggregate per its keep-alive settings.
    fn finished(self: &Arc<Self>, aggregate: &Arc<Aggregate<T>>, failed: bool) {
        let keep_alive = aggregate.settings.keep_alive;
        if keep_alive.is_zero() || (failed && !aggregate.settings.keep_alive_on_error) {
            self.evict(aggregate);
            return;
        }

        let shared = Arc::clone(self);
        let aggregate = Arc::clone(aggregate);
        tokio::spawn(async move {
            tokio::time::sleep(keep_alive).await;
            shared.evict(&aggregate);
        });
    }

    /// Removes `aggregate` if it is still the registered one for its key.
    fn evict(&self, aggregate: &Arc<Aggregate<T>>) -> bool {
        let removed = {
            let mut map = self.aggregates.lock();
            self.remove_locked(&mut map, aggregate)
        };
        if removed {
            tracing::debug!(key = aggregate.key(), "aggregate evicted");
            self.bus.publish(Event::new(EventKind::AggregateEvicted).with_key(aggregate.key()));
        }
        removed
    }

    fn remove_locked(&self, map: &mut HashMap<String, Arc<Aggregate<T>>>, aggregate: &Arc<Aggregate<T>>) -> bool {
        match map.get(aggregate.key()) {
            Some(current) if Arc::ptr_eq(current, aggregate) => {
                map.remove(aggregate.key());
                aggregate.closed.store(true, Ordering::Release);
                true
            }
            _ => false,
        }
    }

    fn detach(self: &Arc<Self>, aggregate: &Arc<Aggregate<T>>) {
        enum Action {
            Nothing,
            Cancel,
            Teardown(CancellationToken),
        }

        let action = {
            let mut map = self.aggregates.lock();
            let remaining = aggregate.waiters.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
            if remaining > 0 || aggregate.closed.load(Ordering::Acquire) || aggregate.log.is_terminated() {
                Action::Nothing
            } else if aggregate.is_open_ended() && !aggregate.settings.keep_alive.is_zero() {
                let timer = CancellationToken::new();
                if let Some(previous) = aggregate.teardown.lock().replace(timer.clone()) {
                    previous.cancel();
                }
                Action::Teardown(timer)
            } else if self.remove_locked(&mut map, aggregate) {
                Action::Cancel
            } else {
                Action::Nothing
            }
        };

        match action {
            Action::Nothing => {}
            Action::Cancel => self.cancel(aggregate),
            Action::Teardown(timer) => self.schedule_teardown(aggregate, timer),
        }
    }

    fn schedule_teardown(self: &Arc<Self>, aggregate: &Arc<Aggregate<T>>, timer: CancellationToken) {
        let keep_alive = aggregate.settings.keep_alive;
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.teardown_if_idle(aggregate);
            return;
        };

        let shared = Arc::clone(self);
        let aggregate = Arc::clone(aggregate);
        handle.spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(keep_alive) => shared.teardown_if_idle(&aggregate),
            }
        });
    }

    fn teardown_if_idle(&self, aggregate: &Arc<Aggregate<T>>) {
        let idle = {
            let mut map = self.aggregates.lock();
            aggregate.waiters() == 0 && self.remove_locked(&mut map, aggregate)
        };
        if idle {
            self.cancel(aggregate);
        }
    }

    /// Cancels an aggregate that was just removed from the map.
    fn cancel(&self, aggregate: &Arc<Aggregate<T>>) {
        aggregate.token.cancel();
        aggregate.log.append(Notification::Error(SourceError::Cancelled));
        tracing::debug!(key = aggregate.key(), "aggregate cancelled");
        self.bus.publish(Event::new(EventKind::AggregateCancelled).with_key(aggregate.key()));
        self.bus.publish(Event::new(EventKind::AggregateEvicted).with_key(aggregate.key()));
    }
}

/// Single-shot execution: one value (or none), then a terminal notification.
async fn run_once<T: Payload>(aggregate: &Aggregate<T>) -> Outcome {
    match aggregate.execute().await {
        None => Outcome::Cancelled,
        Some(Ok(value)) => {
            if let Some(value) = value {
                aggregate.log.append(Notification::Next(value));
            }
            aggregate.log.append(Notification::Completed);
            Outcome::Completed
        }
        Some(Err(e)) => {
            aggregate.log.append(Notification::Error(e));
            Outcome::Failed
        }
    }
}

/// One caller's membership in an aggregate; detaches on drop.
struct Attachment<T: Payload> {
    shared: Arc<Shared<T>>,
    aggregate: Arc<Aggregate<T>>,
    detached: AtomicBool,
}

impl<T: Payload> Drop for Attachment<T> {
    fn drop(&mut self) {
        if !self.detached.swap(true, Ordering::AcqRel) {
            self.shared.detach(&self.aggregate);
        }
    }
}

/// Replayed notifications of one aggregate for one caller.
pub(crate) struct AggregateStream<T: Payload> {
    inner: BoxStream<'static, Notification<T>>,
    _attachment: Attachment<T>,
}

impl<T: Payload> Stream for AggregateStream<T> {
    type Item = Notification<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregable;
    use crate::sources::KeyParams;
    use std::sync::atomic::AtomicUsize;

    type Calls = Arc<AtomicUsize>;

    fn aggregator() -> Aggregator<u32> {
        Aggregator::new(Bus::new(64), Duration::ZERO)
    }

    /// Execution that counts calls, sleeps `delay` and yields `value`.
    fn counting(calls: &Calls, delay: Duration, value: Result<u32, SourceError>) -> Execute<u32> {
        let calls = Arc::clone(calls);
        Arc::new(move |ctx: CancellationToken| {
            let calls = Arc::clone(&calls);
            let value = value.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::select! {
                    _ = ctx.cancelled() => Err(SourceError::Cancelled),
                    _ = tokio::time::sleep(delay) => value.map(Some),
                }
            }
            .boxed()
        })
    }

    fn single(keep_alive: Duration) -> Settings<u32> {
        Aggregable::<KeyParams, u32>::by_stash_key().with_keep_alive(keep_alive).settings()
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_execution() {
        let agg = aggregator();
        let calls = Calls::default();
        let exec = counting(&calls, Duration::from_millis(100), Ok(7));

        let streams: Vec<_> = (0..8)
            .map(|_| agg.attach("k".into(), single(Duration::ZERO), exec.clone()))
            .collect();
        let results = futures::future::join_all(streams.into_iter().map(|s| s.collect::<Vec<_>>())).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for r in results {
            assert_eq!(r, vec![Notification::Next(7), Notification::Completed]);
        }
        assert_eq!(agg.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn late_caller_joins_running_execution() {
        let agg = aggregator();
        let calls = Calls::default();
        let exec = counting(&calls, Duration::from_millis(100), Ok(1));

        let first = agg.attach("k".into(), single(Duration::ZERO), exec.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = agg.attach("k".into(), single(Duration::ZERO), exec);

        let (a, b) = tokio::join!(first.collect::<Vec<_>>(), second.collect::<Vec<_>>());
        assert_eq!(a, b);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn detaching_one_caller_keeps_the_others() {
        let agg = aggregator();
        let calls = Calls::default();
        let exec = counting(&calls, Duration::from_millis(100), Ok(3));

        let leaving = agg.attach("k".into(), single(Duration::ZERO), exec.clone());
        let staying = agg.attach("k".into(), single(Duration::ZERO), exec);
        drop(leaving);

        let out: Vec<_> = staying.collect().await;
        assert_eq!(out, vec![Notification::Next(3), Notification::Completed]);
    }

    #[tokio::test(start_paused = true)]
    async fn last_detach_cancels_and_evicts() {
        let agg = aggregator();
        let handed_out: Arc<Mutex<Option<CancellationToken>>> = Arc::default();
        let slot = Arc::clone(&handed_out);
        let exec: Execute<u32> = Arc::new(move |ctx: CancellationToken| -> BoxFuture<'static, Result<Option<u32>, SourceError>> {
            *slot.lock() = Some(ctx.clone());
            async move {
                ctx.cancelled().await;
                Err(SourceError::Cancelled)
            }
            .boxed()
        });

        let mut stream = agg.attach("k".into(), single(Duration::from_secs(60)), exec);
        assert!(futures::poll!(stream.next()).is_pending());
        // Let the execution start.
        tokio::task::yield_now().await;
        assert!(agg.contains("k"));

        drop(stream);
        assert!(!agg.contains("k"));
        let token = handed_out.lock().clone().expect("execution started");
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn other_keys_survive_a_cancellation() {
        let agg = aggregator();
        let calls = Calls::default();
        let exec = counting(&calls, Duration::from_millis(100), Ok(5));

        let doomed = agg.attach("a".into(), single(Duration::ZERO), exec.clone());
        let other = agg.attach("b".into(), single(Duration::ZERO), exec);
        drop(doomed);

        assert_eq!(other.collect::<Vec<_>>().await, vec![Notification::Next(5), Notification::Completed]);
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_reuses_finished_execution() {
        let agg = aggregator();
        let calls = Calls::default();
        let exec = counting(&calls, Duration::from_millis(10), Ok(9));
        let keep = Duration::from_secs(10);

        let first: Vec<_> = agg.attach("k".into(), single(keep), exec.clone()).collect().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        let second: Vec<_> = agg.attach("k".into(), single(keep), exec.clone()).collect().await;
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(!agg.contains("k"));
        let _: Vec<_> = agg.attach("k".into(), single(keep), exec).collect().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_are_evicted_unless_kept() {
        let agg = aggregator();
        let calls = Calls::default();
        let exec = counting(&calls, Duration::from_millis(10), Err(SourceError::failed("down")));

        let out: Vec<_> = agg.attach("k".into(), single(Duration::from_secs(10)), exec.clone()).collect().await;
        assert_eq!(out, vec![Notification::Error(SourceError::failed("down"))]);
        assert!(!agg.contains("k"));

        let keep_errors = Aggregable::<KeyParams, u32>::by_stash_key()
            .with_keep_alive(Duration::from_secs(10))
            .with_keep_alive_on_error(true);
        let _: Vec<_> = agg.attach("e".into(), keep_errors.settings(), exec.clone()).collect().await;
        let _: Vec<_> = agg.attach("e".into(), keep_errors.settings(), exec).collect().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(agg.contains("e"));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_source_fails_the_aggregate() {
        let agg = aggregator();
        let exec: Execute<u32> = Arc::new(|_ctx: CancellationToken| -> BoxFuture<'static, Result<Option<u32>, SourceError>> {
            async { panic!("bad source") }.boxed()
        });

        let out: Vec<_> = agg.attach("k".into(), single(Duration::ZERO), exec).collect().await;
        assert_eq!(out, vec![Notification::Error(SourceError::Panicked)]);
    }
}
