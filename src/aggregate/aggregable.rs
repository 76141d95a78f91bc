//! # Aggregation descriptor.
//!
//! An [`Aggregable`] tells the processor that concurrent requests resolving to
//! the same aggregation key share one physical execution, and for how long a
//! finished execution stays joinable.
//!
//! ## Variants
//! - **Single-shot** (default): one execution, replayed to every caller; evicted
//!   `keep_alive` after it finishes.
//! - **Open-ended** ([`Aggregable::open_ended`]): after each execution the delay
//!   function decides when to run again (`None` completes the aggregate).
//!   Refreshes only run while a caller is attached.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use stashkit::{Aggregable, BackoffPolicy, KeyParams};
//!
//! let feed: Aggregable<KeyParams, Vec<String>> = Aggregable::by_stash_key()
//!     .with_keep_alive(Duration::from_secs(30))
//!     .open_ended(|last: Option<&Vec<String>>| match last {
//!         Some(items) if items.is_empty() => Some(Duration::from_secs(5)),
//!         _ => Some(Duration::from_secs(60)),
//!     })
//!     .with_retry(BackoffPolicy::default());
//!
//! assert!(feed.is_open_ended());
//! assert_eq!(feed.delay_until_next_refresh(None), Some(Duration::from_secs(60)));
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::policies::BackoffPolicy;
use crate::sources::Params;

type KeyFn<P> = Arc<dyn Fn(&P) -> String + Send + Sync>;
type DelayFn<T> = Arc<dyn Fn(Option<&T>) -> Option<Duration> + Send + Sync>;

/// Refresh schedule of an open-ended aggregate.
pub(crate) struct Refresh<T> {
    delay: DelayFn<T>,
    pub(crate) retry: Option<BackoffPolicy>,
}

impl<T> Clone for Refresh<T> {
    fn clone(&self) -> Self {
        Self {
            delay: Arc::clone(&self.delay),
            retry: self.retry,
        }
    }
}

impl<T> Refresh<T> {
    pub(crate) fn delay_after(&self, last: Option<&T>) -> Option<Duration> {
        (self.delay)(last)
    }
}

/// Lifetime settings handed to the registry with each attach.
pub(crate) struct Settings<T> {
    pub(crate) keep_alive: Duration,
    pub(crate) keep_alive_on_error: bool,
    pub(crate) refresh: Option<Refresh<T>>,
}

/// Deduplication key plus keep-alive rules.
pub struct Aggregable<P, T> {
    key: KeyFn<P>,
    keep_alive: Duration,
    keep_alive_on_error: bool,
    refresh: Option<Refresh<T>>,
}

impl<P, T> Clone for Aggregable<P, T> {
    fn clone(&self) -> Self {
        Self {
            key: Arc::clone(&self.key),
            keep_alive: self.keep_alive,
            keep_alive_on_error: self.keep_alive_on_error,
            refresh: self.refresh.clone(),
        }
    }
}

impl<P, T> Aggregable<P, T> {
    /// Aggregates by the key `key` computes. No keep-alive, errors not kept.
    pub fn new(key: impl Fn(&P) -> String + Send + Sync + 'static) -> Self {
        Self {
            key: Arc::new(key),
            keep_alive: Duration::ZERO,
            keep_alive_on_error: false,
            refresh: None,
        }
    }

    /// How long a finished execution stays joinable. Zero evicts on completion.
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Whether failed executions also stay joinable for `keep_alive`.
    pub fn with_keep_alive_on_error(mut self, keep: bool) -> Self {
        self.keep_alive_on_error = keep;
        self
    }

    /// Turns the aggregate open-ended with the given refresh schedule.
    ///
    /// `delay` receives the last value produced so far (if any) and returns
    /// the delay until the next execution, or `None` to complete.
    pub fn open_ended(mut self, delay: impl Fn(Option<&T>) -> Option<Duration> + Send + Sync + 'static) -> Self {
        let retry = self.refresh.as_ref().and_then(|r| r.retry);
        self.refresh = Some(Refresh {
            delay: Arc::new(delay),
            retry,
        });
        self
    }

    /// Retries failed refreshes of an open-ended aggregate with `backoff`
    /// instead of failing the stream. No effect on single-shot aggregates.
    pub fn with_retry(mut self, backoff: BackoffPolicy) -> Self {
        if let Some(refresh) = self.refresh.as_mut() {
            refresh.retry = Some(backoff);
        }
        self
    }

    /// Aggregation key for `params`.
    pub fn key_for(&self, params: &P) -> String {
        (self.key)(params)
    }

    /// Keep-alive after completion.
    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    /// True if failed executions are kept alive too.
    pub fn keeps_alive_on_error(&self) -> bool {
        self.keep_alive_on_error
    }

    /// True for open-ended aggregates.
    pub fn is_open_ended(&self) -> bool {
        self.refresh.is_some()
    }

    /// Retry policy for failed refreshes, if any.
    pub fn retry(&self) -> Option<BackoffPolicy> {
        self.refresh.as_ref().and_then(|r| r.retry)
    }

    /// Delay before refreshing after `last`; always `None` for single-shot aggregates.
    pub fn delay_until_next_refresh(&self, last: Option<&T>) -> Option<Duration> {
        self.refresh.as_ref().and_then(|r| r.delay_after(last))
    }

    pub(crate) fn settings(&self) -> Settings<T> {
        Settings {
            keep_alive: self.keep_alive,
            keep_alive_on_error: self.keep_alive_on_error,
            refresh: self.refresh.clone(),
        }
    }
}

impl<P: Params, T> Aggregable<P, T> {
    /// Aggregates by [`Params::stash_key`].
    pub fn by_stash_key() -> Self {
        Self::new(|params: &P| params.stash_key().into_owned())
    }
}
