//! # Source specification for request processing.
//!
//! [`SourceSpec`] bundles a [`SourceRef`] with the optional capabilities the
//! processor honors around it:
//!
//! - **Network required**: checked before every physical call; fails fast
//!   with [`SourceError::NoNetwork`].
//! - **Prepare**: transform applied to each fetched value before anyone sees it.
//! - **Stashable**: where and how fetched values are cached.
//! - **Aggregable**: how concurrent identical requests are coalesced.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use stashkit::{Aggregable, KeyParams, SourceError, SourceFn, SourceRef, SourceSpec};
//!
//! let profile: SourceRef<KeyParams, String> = SourceFn::arc("profile", |p: KeyParams, _ctx: CancellationToken| async move {
//!     Ok::<_, SourceError>(Some(format!("profile of {}", p.key())))
//! });
//!
//! let spec = SourceSpec::new(profile)
//!     .requiring_network()
//!     .with_prepare(|v: String| Ok(v.trim().to_string()))
//!     .with_aggregable(Aggregable::by_stash_key().with_keep_alive(Duration::from_secs(5)));
//!
//! assert!(spec.network_required());
//! assert!(spec.aggregable().is_some());
//! ```

use std::sync::Arc;

use crate::aggregate::Aggregable;
use crate::error::SourceError;
use crate::sources::source::SourceRef;
use crate::stash::{Payload, Stashable};

/// Post-processing applied to each fetched value.
pub type PrepareFn<T> = Arc<dyn Fn(T) -> Result<T, SourceError> + Send + Sync>;

/// Source plus capability flags.
pub struct SourceSpec<P, T> {
    source: SourceRef<P, T>,
    network_required: bool,
    prepare: Option<PrepareFn<T>>,
    stashable: Option<Stashable<P, T>>,
    aggregable: Option<Aggregable<P, T>>,
}

impl<P, T> Clone for SourceSpec<P, T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            network_required: self.network_required,
            prepare: self.prepare.clone(),
            stashable: self.stashable.clone(),
            aggregable: self.aggregable.clone(),
        }
    }
}

impl<P, T> SourceSpec<P, T>
where
    P: Send + Sync + 'static,
    T: Payload,
{
    /// Spec with no capabilities: every request calls the source directly.
    pub fn new(source: SourceRef<P, T>) -> Self {
        Self {
            source,
            network_required: false,
            prepare: None,
            stashable: None,
            aggregable: None,
        }
    }

    /// Returns the source.
    pub fn source(&self) -> &SourceRef<P, T> {
        &self.source
    }

    /// Convenience: returns the source name.
    pub fn name(&self) -> &str {
        self.source.name()
    }

    /// True if the source needs a network connection.
    pub fn network_required(&self) -> bool {
        self.network_required
    }

    /// Returns the prepare transform, if any.
    pub fn prepare(&self) -> Option<&PrepareFn<T>> {
        self.prepare.as_ref()
    }

    /// Returns the stash descriptor, if any.
    pub fn stashable(&self) -> Option<&Stashable<P, T>> {
        self.stashable.as_ref()
    }

    /// Returns the aggregation descriptor, if any.
    pub fn aggregable(&self) -> Option<&Aggregable<P, T>> {
        self.aggregable.as_ref()
    }

    /// Returns a spec whose source needs the network.
    pub fn requiring_network(mut self) -> Self {
        self.network_required = true;
        self
    }

    /// Returns a spec with a prepare transform.
    pub fn with_prepare(mut self, prepare: impl Fn(T) -> Result<T, SourceError> + Send + Sync + 'static) -> Self {
        self.prepare = Some(Arc::new(prepare));
        self
    }

    /// Returns a spec with a stash descriptor.
    pub fn with_stashable(mut self, stashable: Stashable<P, T>) -> Self {
        self.stashable = Some(stashable);
        self
    }

    /// Returns a spec with an aggregation descriptor.
    pub fn with_aggregable(mut self, aggregable: Aggregable<P, T>) -> Self {
        self.aggregable = Some(aggregable);
        self
    }
}
