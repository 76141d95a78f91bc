//! # stashkit
//!
//! **Stashkit** orchestrates where a client's data comes from: a local
//! *stash* (cache), a remote *source*, or both, decided per request by a
//! [`StashPolicy`].
//!
//! Concurrent requests for the same data share one physical source call
//! (aggregation); late joiners replay what already happened. Aggregates may
//! be *open-ended*: they refresh on a schedule while anyone is listening.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     caller          caller          caller
//!       │ progress(p)   │ data(p)       │ request(p)
//!       ▼               ▼               ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  RequestProcessor                                                 │
//! │  - Config (default policy, spacing, timeout)                      │
//! │  - Blueprint::select (policy × stash configuration)               │
//! │  - StashRunner (validity check over the stash slot)               │
//! └──────┬───────────────────────────────────────────────┬────────────┘
//!        ▼                                               ▼
//! ┌──────────────────────────┐              ┌──────────────────────────────┐
//! │  Stash                   │              │  SourceProcessor             │
//! │  - primary / secondary   │              │  - network check, timeout    │
//! │  - StashBackend (plug)   │              │  - prepare                   │
//! │  - lazy entries          │              │  - Aggregator (dedup/replay) │
//! └──────────────────────────┘              └──────────────┬───────────────┘
//!                                                          │ publishes
//!                                                          ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        Bus (broadcast channel)                    │
//! │                     (capacity: Config::bus_capacity)              │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                       ┌────────────────────────┐
//!                       │  subscriber_listener   │
//!                       └───────────┬────────────┘
//!                                   ▼
//!                             SubscriberSet
//!                          ┌────────┼────────┐
//!                          ▼        ▼        ▼
//!                       worker1  worker2  workerN
//! ```
//!
//! ### Aggregate lifecycle
//! ```text
//! attach(key) ──► registry lookup-or-create (one lock)
//!   ├─ new      ─► AggregateCreated, spawn execution on first waiter
//!   └─ existing ─► AggregateJoined, replay history to the new waiter
//!
//! execution ──► Next(v)? ─► Completed | Error(e)
//!   ├─ keep_alive = 0 (or error without keep_alive_on_error) ─► evict now
//!   └─ otherwise ─► evict after keep_alive (late callers reuse the result)
//!
//! last waiter detaches while running
//!   ├─ open-ended with keep_alive ─► teardown timer; a returning caller cancels it
//!   └─ otherwise ─► cancel execution, Error(Cancelled), AggregateCancelled, evict
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                              |
//! |-------------------|---------------------------------------------------------------|-------------------------------------------------|
//! | **Requests**      | Progress streams, payload streams, one-shot requests.          | [`RequestProcessor`], [`Progress`]               |
//! | **Policies**      | Stash/source precedence, refresh retry backoff.                | [`StashPolicy`], [`BackoffPolicy`]               |
//! | **Stash**         | Cache slots, two-tier combine, pluggable backends.             | [`Stash`], [`Stashable`], [`StashBackend`]       |
//! | **Sources**       | Fetch functions and their capabilities.                        | [`Source`], [`SourceFn`], [`SourceSpec`]         |
//! | **Aggregation**   | In-flight dedup, replay, keep-alive, open-ended refresh.       | [`Aggregable`], [`Notification`]                 |
//! | **Subscriber API**| Hook into runtime events (logging, metrics, custom).           | [`Subscribe`], [`Event`]                         |
//! | **Errors**        | Typed errors for sources, stashes and requests.                | [`SourceError`], [`StashError`], [`RequestError`]|
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use stashkit::{
//!     Aggregable, Config, KeyParams, MemoryStash, Progress, RequestProcessor, SourceError, SourceFn,
//!     SourceRef, SourceSpec, StashBackend, StashPolicy, Stashable,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let profile: SourceRef<KeyParams, String> =
//!         SourceFn::arc("profile", |p: KeyParams, _ctx: CancellationToken| async move {
//!             Ok::<_, SourceError>(Some(format!("profile of {}", p.key())))
//!         });
//!
//!     let memory: Arc<dyn StashBackend<String>> = Arc::new(MemoryStash::new());
//!     let spec = SourceSpec::new(profile)
//!         .with_stashable(Stashable::backed_by(memory))
//!         .with_aggregable(Aggregable::by_stash_key().with_keep_alive(Duration::from_secs(1)));
//!
//!     let processor = RequestProcessor::builder(Config::default()).build(spec);
//!
//!     let first = processor.request(KeyParams::new("user/1")).await?;
//!     assert_eq!(first.as_deref(), Some("profile of user/1"));
//!
//!     // Served from the stash now.
//!     let p = KeyParams::new("user/1").with_policy(StashPolicy::StashUnlessExpired);
//!     let second = processor.request(p).await?;
//!     assert_eq!(second, first);
//!     Ok(())
//! }
//! ```

mod aggregate;
mod core;
mod error;
mod events;
mod policies;
mod progress;
mod sources;
mod stash;
mod subscribers;

// ---- Public re-exports ----

pub use aggregate::{Aggregable, Notification, NotificationNode};
pub use core::{
    Blueprint, Config, ProcessorBuilder, RequestProcessor, SourceProcessor, StashRunner, StashState,
};
pub use error::{RequestError, SourceError, StashError};
pub use events::{Bus, Event, EventKind};
pub use policies::{BackoffPolicy, JitterPolicy, StashPolicy};
pub use progress::{Progress, ProgressState};
pub use sources::{
    AlwaysConnected, KeyParams, NetworkFlag, NetworkStatus, Params, PrepareFn, Source, SourceFn,
    SourceRef, SourceSpec,
};
pub use stash::{
    Entry, EntryReader, Expiry, LazyEntry, MemoryStash, Metadata, Payload, Stash, StashBackend,
    Stashable,
};
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
pub use subscribers::{Subscribe, SubscriberSet};
