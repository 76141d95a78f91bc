//! # Per-request stash descriptor.
//!
//! A [`Stashable`] tells the request processor how to find the stash slot for
//! given params, when a stored value counts as expired, and which tags to
//! persist next to a freshly fetched value.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use stashkit::{Expiry, KeyParams, MemoryStash, StashBackend, Stashable};
//!
//! let memory: Arc<dyn StashBackend<String>> = Arc::new(MemoryStash::new());
//! let stashable: Stashable<KeyParams, String> = Stashable::backed_by(memory)
//!     .with_expiry(Expiry::max_age(Duration::from_secs(300)))
//!     .with_tags(|_params, value: &String| vec![format!("len={}", value.len())]);
//!
//! assert!(stashable.stash(&KeyParams::new("user/1")).is_some());
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::sources::Params;
use crate::stash::backend::StashBackend;
use crate::stash::entry::{Metadata, Payload};
use crate::stash::slot::Stash;

/// Predicate deciding whether stored metadata is expired.
#[derive(Clone)]
pub struct Expiry(Arc<dyn Fn(&Metadata) -> bool + Send + Sync>);

impl Expiry {
    /// Custom predicate; `true` means expired.
    pub fn new(f: impl Fn(&Metadata) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Nothing ever expires.
    pub fn never() -> Self {
        Self::new(|_| false)
    }

    /// Expired once older than `max_age`.
    pub fn max_age(max_age: Duration) -> Self {
        Self::new(move |m| m.age() > max_age)
    }

    /// Evaluates the predicate.
    pub fn is_expired(&self, metadata: &Metadata) -> bool {
        (self.0)(metadata)
    }
}

impl Default for Expiry {
    fn default() -> Self {
        Self::never()
    }
}

impl std::fmt::Debug for Expiry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Expiry(..)")
    }
}

type StashFactory<P, T> = Arc<dyn Fn(&P) -> Option<Stash<T>> + Send + Sync>;
type TagsFn<P, T> = Arc<dyn Fn(&P, &T) -> Vec<String> + Send + Sync>;

/// Stash configuration for one kind of request.
pub struct Stashable<P, T> {
    primary: StashFactory<P, T>,
    secondary: Option<StashFactory<P, T>>,
    expiry: Expiry,
    tags: TagsFn<P, T>,
}

impl<P, T> Clone for Stashable<P, T> {
    fn clone(&self) -> Self {
        Self {
            primary: Arc::clone(&self.primary),
            secondary: self.secondary.clone(),
            expiry: self.expiry.clone(),
            tags: Arc::clone(&self.tags),
        }
    }
}

impl<P, T> Stashable<P, T>
where
    P: Send + Sync + 'static,
    T: Payload,
{
    /// Stashable whose primary slot comes from `primary`.
    pub fn new(primary: impl Fn(&P) -> Option<Stash<T>> + Send + Sync + 'static) -> Self {
        Self {
            primary: Arc::new(primary),
            secondary: None,
            expiry: Expiry::never(),
            tags: Arc::new(|_, _| Vec::new()),
        }
    }

    /// Adds a fallback slot; reads fall through to it and back-fill the primary.
    pub fn with_secondary(
        mut self,
        secondary: impl Fn(&P) -> Option<Stash<T>> + Send + Sync + 'static,
    ) -> Self {
        self.secondary = Some(Arc::new(secondary));
        self
    }

    /// Sets the expiry predicate.
    pub fn with_expiry(mut self, expiry: Expiry) -> Self {
        self.expiry = expiry;
        self
    }

    /// Sets the function computing tags persisted with fetched values.
    pub fn with_tags(mut self, tags: impl Fn(&P, &T) -> Vec<String> + Send + Sync + 'static) -> Self {
        self.tags = Arc::new(tags);
        self
    }

    /// Resolves the slot for `params`: primary combined with secondary when both exist.
    pub fn stash(&self, params: &P) -> Option<Stash<T>> {
        let primary = (self.primary)(params);
        let secondary = self.secondary.as_ref().and_then(|f| f(params));
        match (primary, secondary) {
            (Some(p), Some(s)) => Some(p.combine(s)),
            (Some(p), None) => Some(p),
            (None, Some(s)) => Some(s),
            (None, None) => None,
        }
    }

    /// The expiry predicate.
    pub fn expiry(&self) -> &Expiry {
        &self.expiry
    }

    /// Metadata to store with `value` fetched for `params`.
    pub fn metadata_for(&self, params: &P, value: &T) -> Metadata {
        Metadata::now((self.tags)(params, value))
    }
}

impl<P, T> Stashable<P, T>
where
    P: Params,
    T: Payload,
{
    /// Stashable keyed by [`Params::stash_key`] in a single backend.
    pub fn backed_by(backend: Arc<dyn StashBackend<T>>) -> Self {
        Self::new(move |params: &P| Some(Stash::new(params.stash_key().as_ref(), Arc::clone(&backend))))
    }

    /// Two-tier stashable keyed by [`Params::stash_key`].
    pub fn tiered(primary: Arc<dyn StashBackend<T>>, secondary: Arc<dyn StashBackend<T>>) -> Self {
        Self::backed_by(primary).with_secondary(move |params: &P| {
            Some(Stash::new(params.stash_key().as_ref(), Arc::clone(&secondary)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::KeyParams;
    use crate::stash::backend::MemoryStash;
    use crate::stash::entry::Entry;

    #[test]
    fn max_age_expiry() {
        let expiry = Expiry::max_age(Duration::from_secs(60));
        let fresh = Metadata::now(vec![]);
        let old = Metadata::at(chrono::Utc::now() - chrono::TimeDelta::minutes(5), vec![]);
        assert!(!expiry.is_expired(&fresh));
        assert!(expiry.is_expired(&old));
    }

    #[test]
    fn tags_flow_into_metadata() {
        let memory: Arc<dyn StashBackend<u32>> = Arc::new(MemoryStash::new());
        let stashable: Stashable<KeyParams, u32> =
            Stashable::backed_by(memory).with_tags(|p: &KeyParams, v: &u32| vec![p.key().to_string(), v.to_string()]);
        let m = stashable.metadata_for(&KeyParams::new("a"), &3);
        assert_eq!(m.tags, vec!["a".to_string(), "3".to_string()]);
    }

    #[tokio::test]
    async fn tiered_reads_through_secondary() {
        let primary = Arc::new(MemoryStash::<u32>::new());
        let secondary = Arc::new(MemoryStash::<u32>::new());
        secondary.insert("a", Entry::fresh(8));

        let stashable: Stashable<KeyParams, u32> = Stashable::tiered(primary.clone(), secondary);
        let stash = stashable.stash(&KeyParams::new("a")).unwrap();
        assert_eq!(stash.get().await.unwrap().payload, 8);
        assert!(primary.peek("a").is_some());
    }

    #[test]
    fn missing_slot_yields_none() {
        let stashable: Stashable<KeyParams, u32> = Stashable::new(|_| None);
        assert!(stashable.stash(&KeyParams::new("a")).is_none());
    }
}
