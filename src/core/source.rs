//! # Source processor: one logical source call.
//!
//! [`SourceProcessor`] turns a [`SourceSpec`] into a stream of
//! [`Notification`]s for given params:
//!
//! ```text
//! notifications(params)
//!   ├─► network required && offline ──► Error(NoNetwork)            (no execution)
//!   ├─► aggregable ──► registry.attach(key) ──► replayed shared execution
//!   └─► otherwise  ──► direct execution owned by the stream
//!
//! execution:
//!   network check ─► SourceCalled ─► fetch (optional timeout) ─► prepare ─► Ok/Err
//! ```
//!
//! ## Rules
//! - Every physical call gets a child [`CancellationToken`]; it is cancelled when
//!   the last interested caller goes away (direct: on stream drop).
//! - A timed-out call is cancelled and fails with `SourceError::Failed`.
//! - Failures other than cancellation are logged and published as `SourceFailed`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::{FutureExt, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::aggregate::Notification;
use crate::aggregate::registry::{Aggregator, Execute};
use crate::core::config::Config;
use crate::error::SourceError;
use crate::events::{Bus, Event, EventKind};
use crate::sources::{NetworkStatus, Params, PrepareFn, SourceRef, SourceSpec};
use crate::stash::Payload;

/// Runs sources on behalf of the request processor, deduplicating when aggregable.
pub struct SourceProcessor<P, T: Payload> {
    spec: SourceSpec<P, T>,
    aggregator: Aggregator<T>,
    network: Arc<dyn NetworkStatus>,
    timeout: Option<Duration>,
    bus: Bus,
}

impl<P: Params, T: Payload> SourceProcessor<P, T> {
    pub(crate) fn new(spec: SourceSpec<P, T>, network: Arc<dyn NetworkStatus>, config: &Config, bus: Bus) -> Self {
        Self {
            spec,
            aggregator: Aggregator::new(bus.clone(), config.terminal_spacing),
            network,
            timeout: config.source_timeout(),
            bus,
        }
    }

    /// Notifications of one logical call for `params`.
    ///
    /// Dropping the stream detaches from (or cancels) the execution.
    pub fn notifications(&self, params: &P) -> BoxStream<'static, Notification<T>> {
        if self.spec.network_required() && !self.network.is_connected() {
            let call = self.call(params);
            let error = call.failed(SourceError::NoNetwork);
            return futures::stream::iter([Notification::Error(error)]).boxed();
        }

        let call = self.call(params);
        let execute: Execute<T> = Arc::new(move |ctx: CancellationToken| call.clone().run(ctx).boxed());

        match self.spec.aggregable() {
            Some(aggregable) => self
                .aggregator
                .attach(aggregable.key_for(params), aggregable.settings(), execute)
                .boxed(),
            None => direct(execute).boxed(),
        }
    }

    /// First value of one logical call; `Ok(None)` on an empty success.
    pub async fn fetch(&self, params: &P) -> Result<Option<T>, SourceError> {
        match self.notifications(params).next().await {
            Some(Notification::Next(value)) => Ok(Some(value)),
            Some(Notification::Error(e)) => Err(e),
            Some(Notification::Completed) | None => Ok(None),
        }
    }

    /// Number of aggregates currently registered.
    pub fn in_flight(&self) -> usize {
        self.aggregator.len()
    }

    /// True if an aggregate is registered for `key`.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.aggregator.contains(key)
    }

    fn call(&self, params: &P) -> Call<P, T> {
        Call {
            source: Arc::clone(self.spec.source()),
            params: params.clone(),
            prepare: self.spec.prepare().cloned(),
            network: self.spec.network_required().then(|| Arc::clone(&self.network)),
            timeout: self.timeout,
            bus: self.bus.clone(),
        }
    }
}

/// Everything one physical call needs, owned so the future is `'static`.
struct Call<P, T> {
    source: SourceRef<P, T>,
    params: P,
    prepare: Option<PrepareFn<T>>,
    network: Option<Arc<dyn NetworkStatus>>,
    timeout: Option<Duration>,
    bus: Bus,
}

impl<P: Clone, T> Clone for Call<P, T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            params: self.params.clone(),
            prepare: self.prepare.clone(),
            network: self.network.clone(),
            timeout: self.timeout,
            bus: self.bus.clone(),
        }
    }
}

impl<P: Params, T: Payload> Call<P, T> {
    async fn run(self, ctx: CancellationToken) -> Result<Option<T>, SourceError> {
        if let Some(network) = &self.network {
            if !network.is_connected() {
                return Err(self.failed(SourceError::NoNetwork));
            }
        }

        let key = self.params.stash_key();
        tracing::debug!(source = self.source.name(), key = %key, "calling source");
        self.bus.publish(
            Event::new(EventKind::SourceCalled)
                .with_key(key.as_ref())
                .with_source(self.source.name()),
        );

        let fetched = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.source.fetch(&self.params, ctx.clone())).await {
                Ok(res) => res,
                Err(_elapsed) => {
                    ctx.cancel();
                    Err(SourceError::failed(format!("timed out after {limit:?}")))
                }
            },
            None => self.source.fetch(&self.params, ctx).await,
        };

        let prepared = match (fetched, &self.prepare) {
            (Ok(Some(value)), Some(prepare)) => (prepare.as_ref())(value).map(Some),
            (other, _) => other,
        };
        prepared.map_err(|e| self.failed(e))
    }

    /// Logs and publishes a failure, returning it.
    fn failed(&self, error: SourceError) -> SourceError {
        if error != SourceError::Cancelled {
            let key = self.params.stash_key();
            tracing::warn!(source = self.source.name(), key = %key, error = %error, "source failed");
            self.bus.publish(
                Event::new(EventKind::SourceFailed)
                    .with_key(key.as_ref())
                    .with_source(self.source.name())
                    .with_reason(format!("{}: {error}", error.as_label())),
            );
        }
        error
    }
}

/// Unshared execution; cancelled when the stream is dropped.
fn direct<T: Payload>(execute: Execute<T>) -> impl Stream<Item = Notification<T>> + Send + 'static {
    async_stream::stream! {
        let token = CancellationToken::new();
        let _cancel_on_drop = token.clone().drop_guard();

        let result = AssertUnwindSafe(execute(token.child_token()))
            .catch_unwind()
            .await
            .unwrap_or(Err(SourceError::Panicked));

        match result {
            Ok(Some(value)) => {
                yield Notification::Next(value);
                yield Notification::Completed;
            }
            Ok(None) => {
                yield Notification::Completed;
            }
            Err(e) => {
                yield Notification::Error(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregable;
    use crate::sources::{KeyParams, NetworkFlag, SourceFn};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_source(calls: &Arc<AtomicUsize>, delay: Duration) -> SourceRef<KeyParams, String> {
        let calls = Arc::clone(calls);
        SourceFn::arc("echo", move |p: KeyParams, _ctx: CancellationToken| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                Ok::<_, SourceError>(Some(format!(" {} ", p.key())))
            }
        })
    }

    fn processor(spec: SourceSpec<KeyParams, String>, network: Arc<dyn NetworkStatus>, config: &Config) -> SourceProcessor<KeyParams, String> {
        SourceProcessor::new(spec, network, config, Bus::new(64))
    }

    #[tokio::test(start_paused = true)]
    async fn prepare_transforms_values() {
        let calls = Arc::new(AtomicUsize::new(0));
        let spec = SourceSpec::new(counting_source(&calls, Duration::ZERO)).with_prepare(|v: String| Ok(v.trim().to_string()));
        let sp = processor(spec, Arc::new(crate::sources::AlwaysConnected), &Config::default());

        assert_eq!(sp.fetch(&KeyParams::new("a")).await, Ok(Some("a".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn offline_network_fails_fast() {
        let calls = Arc::new(AtomicUsize::new(0));
        let spec = SourceSpec::new(counting_source(&calls, Duration::ZERO))
            .requiring_network()
            .with_aggregable(Aggregable::by_stash_key());
        let flag = Arc::new(NetworkFlag::new(false));
        let sp = processor(spec, flag.clone(), &Config::default());

        assert_eq!(sp.fetch(&KeyParams::new("a")).await, Err(SourceError::NoNetwork));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(sp.in_flight(), 0);

        flag.set_connected(true);
        assert!(sp.fetch(&KeyParams::new("a")).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fails_the_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let spec = SourceSpec::new(counting_source(&calls, Duration::from_secs(10)));
        let config = Config {
            source_timeout: Duration::from_secs(1),
            ..Config::default()
        };
        let sp = processor(spec, Arc::new(crate::sources::AlwaysConnected), &config);

        let err = sp.fetch(&KeyParams::new("a")).await.unwrap_err();
        assert_eq!(err.as_label(), "source_failed");
    }

    #[tokio::test(start_paused = true)]
    async fn aggregable_calls_are_shared() {
        let calls = Arc::new(AtomicUsize::new(0));
        let spec = SourceSpec::new(counting_source(&calls, Duration::from_millis(50))).with_aggregable(Aggregable::by_stash_key());
        let sp = processor(spec, Arc::new(crate::sources::AlwaysConnected), &Config::default());

        let p = KeyParams::new("a");
        let other = KeyParams::new("b");
        let (a, b, c) = tokio::join!(sp.fetch(&p), sp.fetch(&p), sp.fetch(&other));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn direct_calls_are_not_shared() {
        let calls = Arc::new(AtomicUsize::new(0));
        let spec = SourceSpec::new(counting_source(&calls, Duration::from_millis(50)));
        let sp = processor(spec, Arc::new(crate::sources::AlwaysConnected), &Config::default());

        let p = KeyParams::new("a");
        let _ = tokio::join!(sp.fetch(&p), sp.fetch(&p));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
