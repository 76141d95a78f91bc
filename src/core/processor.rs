//! # Request processor: stash/source orchestration per request.
//!
//! [`RequestProcessor`] is the public entry point. For each request it:
//! 1. resolves the params' [`StashPolicy`] against the [`Config`] default;
//! 2. selects a [`Blueprint`];
//! 3. emits the blueprint's [`Progress`] sequence as a stream.
//!
//! ```text
//! progress(params)
//!   Executing
//!   ├─ Nothing               ─────────────────────────────────────────────┐
//!   ├─ StashOnly             ─► FetchingFromStash ─► ReceivedFromStash ────┤
//!   ├─ SourceOnly            ─► CallingSource ─► ReceivedFromSource ───────┤
//!   ├─ SourceAndSave         ─► .. ReceivedFromSource ─► Saving ─► Saved ──┤
//!   ├─ SourceAndSaveOrStash  ─► as above; on failure/empty ─► stash read ──┤
//!   └─ StashState            ─► per StashRunner: stash, source, or both ───┤
//!   Complete ◄────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//! - Stash write failures are logged and published as `StashWriteFailed`;
//!   `SavedToStash` is emitted regardless and the value is still delivered.
//! - A source error ends the stream with `Err(RequestError::Source(..))`
//!   (unless the blueprint falls back to the stash).
//! - Dropping a progress stream detaches from the source execution.
//!
//! ## Example
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use stashkit::{
//!     KeyParams, MemoryStash, RequestProcessor, SourceError, SourceFn, SourceRef, SourceSpec,
//!     StashBackend, Stashable,
//! };
//!
//! let upper: SourceRef<KeyParams, String> =
//!     SourceFn::arc("upper", |p: KeyParams, _ctx: CancellationToken| async move {
//!         Ok::<_, SourceError>(Some(p.key().to_uppercase()))
//!     });
//! let memory: Arc<dyn StashBackend<String>> = Arc::new(MemoryStash::new());
//! let processor = RequestProcessor::new(SourceSpec::new(upper).with_stashable(Stashable::backed_by(memory)));
//!
//! let value = processor.request(KeyParams::new("abc")).await.unwrap();
//! assert_eq!(value.as_deref(), Some("ABC"));
//! # }
//! ```

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_util::sync::DropGuard;

use crate::aggregate::Notification;
use crate::core::blueprint::Blueprint;
use crate::core::builder::ProcessorBuilder;
use crate::core::config::Config;
use crate::core::runner::StashState;
use crate::core::source::SourceProcessor;
use crate::error::{RequestError, SourceError};
use crate::events::{Bus, Event, EventKind};
use crate::policies::StashPolicy;
use crate::progress::Progress;
use crate::sources::{NetworkStatus, Params, SourceSpec};
use crate::stash::{Entry, Metadata, Payload, Stash};

/// Orchestrates stash and source for one kind of request.
///
/// Cheap to clone; clones share the aggregate registry and the event bus.
pub struct RequestProcessor<P, T: Payload> {
    inner: Arc<Inner<P, T>>,
}

impl<P, T: Payload> Clone for RequestProcessor<P, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<P, T: Payload> {
    config: Config,
    spec: SourceSpec<P, T>,
    sources: SourceProcessor<P, T>,
    bus: Bus,
    /// Stops the subscriber listener when the last clone is dropped.
    _listener: Option<DropGuard>,
}

impl<P: Params, T: Payload> RequestProcessor<P, T> {
    /// Starts building a processor with `config`.
    pub fn builder(config: Config) -> ProcessorBuilder<P, T> {
        ProcessorBuilder::new(config)
    }

    /// Processor with default config, no subscribers and an always-connected network.
    pub fn new(spec: SourceSpec<P, T>) -> Self {
        ProcessorBuilder::new(Config::default()).build(spec)
    }

    pub(crate) fn from_parts(
        config: Config,
        spec: SourceSpec<P, T>,
        network: Arc<dyn NetworkStatus>,
        bus: Bus,
        listener: Option<DropGuard>,
    ) -> Self {
        let sources = SourceProcessor::new(spec.clone(), network, &config, bus.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                spec,
                sources,
                bus,
                _listener: listener,
            }),
        }
    }

    /// The configuration this processor runs with.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The source descriptor.
    pub fn spec(&self) -> &SourceSpec<P, T> {
        &self.inner.spec
    }

    /// The source layer (for direct, stash-free calls).
    pub fn sources(&self) -> &SourceProcessor<P, T> {
        &self.inner.sources
    }

    /// Receiver for runtime events published from now on.
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.inner.bus.subscribe()
    }

    /// The plan a request with `params` would run.
    pub fn blueprint(&self, params: &P) -> Blueprint<T> {
        let policy = self.inner.config.resolve_policy(params.policy());
        Blueprint::select(policy, self.inner.spec.stashable(), params)
    }

    /// Progress of one request.
    pub fn progress(&self, params: P) -> BoxStream<'static, Result<Progress<T>, RequestError>> {
        progress_stream(Arc::clone(&self.inner), params).boxed()
    }

    /// Payloads of one request (stash and source values, in order).
    pub fn data(&self, params: P) -> BoxStream<'static, Result<T, RequestError>> {
        self.progress(params)
            .filter_map(|step| {
                futures::future::ready(match step {
                    Ok(progress) => progress.into_payload().map(Ok),
                    Err(e) => Some(Err(e)),
                })
            })
            .boxed()
    }

    /// Runs the request to completion and returns the freshest payload.
    ///
    /// Open-ended sources never complete while refreshing; use [`data`](Self::data) for those.
    pub async fn request(&self, params: P) -> Result<Option<T>, RequestError> {
        let mut latest = None;
        let mut steps = self.progress(params);
        while let Some(step) = steps.next().await {
            if let Some(value) = step?.into_payload() {
                latest = Some(value);
            }
        }
        Ok(latest)
    }

    /// The stash slot for `params`.
    pub fn stash(&self, params: &P) -> Result<Stash<T>, RequestError> {
        self.inner
            .spec
            .stashable()
            .and_then(|s| s.stash(params))
            .ok_or(RequestError::NoStash)
    }

    /// The stash slot for `params`, unless `policy` excludes the stash.
    pub fn stash_with(&self, params: &P, policy: StashPolicy) -> Result<Stash<T>, RequestError> {
        match self.inner.config.resolve_policy(policy) {
            StashPolicy::SourceOnlyNoStash => Err(RequestError::NoStash),
            _ => self.stash(params),
        }
    }

    /// Number of aggregates currently registered.
    pub fn in_flight(&self) -> usize {
        self.inner.sources.in_flight()
    }

    /// True if an aggregate is registered under `key`.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.inner.sources.is_in_flight(key)
    }
}

impl<P: Params, T: Payload> Inner<P, T> {
    async fn save(&self, stash: &Stash<T>, params: &P, value: T) {
        let metadata = match self.spec.stashable() {
            Some(stashable) => stashable.metadata_for(params, &value),
            None => Metadata::now(Vec::new()),
        };
        if let Err(e) = stash.put(Entry::new(metadata, value)).await {
            tracing::warn!(key = stash.key(), error = %e, "stash write failed");
            self.bus.publish(
                Event::new(EventKind::StashWriteFailed)
                    .with_key(stash.key())
                    .with_source(self.spec.name())
                    .with_reason(e.to_string()),
            );
        }
    }
}

fn progress_stream<P: Params, T: Payload>(
    inner: Arc<Inner<P, T>>,
    params: P,
) -> impl Stream<Item = Result<Progress<T>, RequestError>> + Send + 'static {
    async_stream::try_stream! {
        yield Progress::Executing;

        let policy = inner.config.resolve_policy(params.policy());
        let blueprint = Blueprint::select(policy, inner.spec.stashable(), &params);
        tracing::debug!(
            source = inner.spec.name(),
            key = %params.stash_key(),
            policy = policy.as_label(),
            blueprint = blueprint.as_label(),
            "request planned"
        );

        match blueprint {
            Blueprint::Nothing => {}
            Blueprint::StashOnly(stash) => {
                yield Progress::FetchingFromStash;
                yield Progress::ReceivedFromStash(stash.get().await.map(|e| e.payload));
            }
            Blueprint::SourceOnly => {
                for await step in source_steps(Arc::clone(&inner), params.clone(), None, false) {
                    yield step?;
                }
            }
            Blueprint::SourceAndSave(stash) => {
                for await step in source_steps(Arc::clone(&inner), params.clone(), Some(stash), false) {
                    yield step?;
                }
            }
            Blueprint::SourceAndSaveOrStash(stash) => {
                let mut failure = None;
                for await step in source_steps(Arc::clone(&inner), params.clone(), Some(stash.clone()), true) {
                    match step {
                        Ok(progress) => {
                            yield progress;
                        }
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
                if let Some(error) = failure {
                    tracing::debug!(key = stash.key(), error = %error, "source failed, falling back to stash");
                    yield Progress::FetchingFromStash;
                    match stash.get().await {
                        Some(entry) => {
                            yield Progress::ReceivedFromStash(Some(entry.payload));
                        }
                        None => Err::<(), _>(error)?,
                    }
                }
            }
            Blueprint::StashState(runner) => match runner.state().await {
                StashState::Stash(value) => {
                    yield Progress::FetchingFromStash;
                    yield Progress::ReceivedFromStash(value);
                }
                StashState::StashAndSource(value) => {
                    yield Progress::FetchingFromStash;
                    yield Progress::ReceivedFromStash(Some(value));
                    for await step in source_steps(Arc::clone(&inner), params.clone(), Some(runner.stash().clone()), false) {
                        yield step?;
                    }
                }
                StashState::Source => {
                    for await step in source_steps(Arc::clone(&inner), params.clone(), Some(runner.stash().clone()), false) {
                        yield step?;
                    }
                }
            },
        }

        yield Progress::Complete;
    }
}

/// `CallingSource`, then one `ReceivedFromSource` (plus save steps) per value.
///
/// With `empty_is_error` an empty success fails with [`SourceError::Empty`].
fn source_steps<P: Params, T: Payload>(
    inner: Arc<Inner<P, T>>,
    params: P,
    save: Option<Stash<T>>,
    empty_is_error: bool,
) -> impl Stream<Item = Result<Progress<T>, SourceError>> + Send + 'static {
    async_stream::try_stream! {
        yield Progress::CallingSource;

        let mut received = false;
        let mut notifications = inner.sources.notifications(&params);
        while let Some(notification) = notifications.next().await {
            match notification {
                Notification::Next(value) => {
                    received = true;
                    yield Progress::ReceivedFromSource(Some(value.clone()));
                    if let Some(stash) = &save {
                        yield Progress::SavingToStash;
                        inner.save(stash, &params, value).await;
                        yield Progress::SavedToStash;
                    }
                }
                Notification::Error(e) => Err::<(), _>(e)?,
                Notification::Completed => break,
            }
        }

        if !received {
            if empty_is_error {
                Err::<(), _>(SourceError::Empty)?;
            }
            yield Progress::ReceivedFromSource(None);
        }
    }
}
