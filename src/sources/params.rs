//! # Request parameters.
//!
//! [`Params`] is what a caller hands to the request processor: a stable
//! stash key plus the [`StashPolicy`] governing that one request. Params are
//! cloned freely (into aggregates, spawned executions, stash factories), so
//! implementors should be cheap to clone.

use std::borrow::Cow;
use std::sync::Arc;

use crate::policies::StashPolicy;

/// Immutable key object for one logical request.
pub trait Params: Clone + Send + Sync + 'static {
    /// Stable cache key; also the default aggregation key.
    fn stash_key(&self) -> Cow<'_, str>;

    /// Policy for this request. [`StashPolicy::Default`] defers to the processor config.
    fn policy(&self) -> StashPolicy {
        StashPolicy::Default
    }
}

/// Ready-made [`Params`]: a string key and a policy.
///
/// ## Example
/// ```rust
/// use stashkit::{KeyParams, Params, StashPolicy};
///
/// let p = KeyParams::new("user/42").with_policy(StashPolicy::Source);
/// assert_eq!(p.stash_key(), "user/42");
/// assert_eq!(p.policy(), StashPolicy::Source);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct KeyParams {
    key: Arc<str>,
    policy: StashPolicy,
}

impl KeyParams {
    /// Params for `key` with [`StashPolicy::Default`].
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self {
            key: key.into(),
            policy: StashPolicy::Default,
        }
    }

    /// Returns params with the policy replaced.
    pub fn with_policy(mut self, policy: StashPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Params for KeyParams {
    fn stash_key(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.key)
    }

    fn policy(&self) -> StashPolicy {
        self.policy
    }
}
