//! # Stash validity check for freshness-aware policies.
//!
//! [`StashRunner::state`] reads the stash entry lazily and decides whether a
//! request is served from the stash, from the source, or from both.
//!
//! ```text
//! get_lazy ──► none ───────────────────────────────► expired, no value
//!         └──► metadata ──► expiry predicate ──► expired?
//!                              └─ !expired || policy tolerates expiry ──► payload
//!
//! StashOnlyNoSource                        ──► Stash(value)
//! value && (expired || StashThenSource)    ──► StashAndSource(value)
//! value                                    ──► Stash(Some(value))
//! otherwise                                ──► Source
//! ```
//!
//! ## Rules
//! - The payload is never read for an expired entry the policy does not tolerate.
//! - The lazy entry is released on every path (read errors, early returns, drop).
//! - Read errors count as a miss and are logged.

use crate::policies::StashPolicy;
use crate::stash::{Expiry, Payload, Stash};

/// Outcome of the validity check. Carries the value already read.
#[derive(Clone, Debug, PartialEq)]
pub enum StashState<T> {
    /// Serve the stash value only; `None` when there is nothing usable.
    Stash(Option<T>),
    /// Emit the stash value, then also call the source.
    StashAndSource(T),
    /// Call the source only.
    Source,
}

/// Validity check over one stash slot under one policy.
#[derive(Clone, Debug)]
pub struct StashRunner<T> {
    stash: Stash<T>,
    expiry: Expiry,
    policy: StashPolicy,
}

impl<T: Payload> StashRunner<T> {
    /// Creates a runner.
    pub fn new(stash: Stash<T>, expiry: Expiry, policy: StashPolicy) -> Self {
        Self { stash, expiry, policy }
    }

    /// The slot this runner reads.
    pub fn stash(&self) -> &Stash<T> {
        &self.stash
    }

    /// The policy this runner decides for.
    pub fn policy(&self) -> StashPolicy {
        self.policy
    }

    /// Reads the slot and decides the plan.
    pub async fn state(&self) -> StashState<T> {
        let (expired, value) = self.read().await;
        let policy = self.policy;

        if policy == StashPolicy::StashOnlyNoSource {
            return StashState::Stash(value);
        }
        match value {
            Some(v) if expired || policy == StashPolicy::StashThenSource => StashState::StashAndSource(v),
            Some(v) => StashState::Stash(Some(v)),
            None => StashState::Source,
        }
    }

    /// `(expired, usable value)`. A missing or unreadable entry counts as expired.
    async fn read(&self) -> (bool, Option<T>) {
        let Some(mut entry) = self.stash.get_lazy().await else {
            return (true, None);
        };

        let metadata = match entry.metadata().await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(key = self.stash.key(), error = %e, "stash metadata unreadable");
                return (true, None);
            }
        };

        let expired = self.expiry.is_expired(&metadata);
        if expired && !self.policy.tolerates_expiry() {
            return (true, None);
        }

        match entry.payload().await {
            Ok(value) => (expired, value),
            Err(e) => {
                tracing::warn!(key = self.stash.key(), error = %e, "stash payload unreadable");
                (expired, None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stash::{Entry, MemoryStash, Metadata, StashBackend};
    use std::sync::Arc;
    use std::time::Duration;

    enum Slot {
        Absent,
        Fresh,
        Expired,
    }

    fn runner(slot: Slot, policy: StashPolicy) -> StashRunner<u32> {
        let backend = Arc::new(MemoryStash::<u32>::new());
        match slot {
            Slot::Absent => {}
            Slot::Fresh => backend.insert("k", Entry::fresh(1)),
            Slot::Expired => {
                let old = chrono::Utc::now() - chrono::TimeDelta::hours(1);
                backend.insert("k", Entry::new(Metadata::at(old, vec![]), 1));
            }
        }
        let stash = Stash::new("k", backend as Arc<dyn StashBackend<u32>>);
        StashRunner::new(stash, Expiry::max_age(Duration::from_secs(60)), policy)
    }

    #[tokio::test]
    async fn if_expired_policy() {
        use StashPolicy::StashThenSourceIfExpired as P;
        assert_eq!(runner(Slot::Absent, P).state().await, StashState::Source);
        assert_eq!(runner(Slot::Fresh, P).state().await, StashState::Stash(Some(1)));
        assert_eq!(runner(Slot::Expired, P).state().await, StashState::StashAndSource(1));
    }

    #[tokio::test]
    async fn stash_then_source_always_calls_source() {
        use StashPolicy::StashThenSource as P;
        assert_eq!(runner(Slot::Absent, P).state().await, StashState::Source);
        assert_eq!(runner(Slot::Fresh, P).state().await, StashState::StashAndSource(1));
        assert_eq!(runner(Slot::Expired, P).state().await, StashState::StashAndSource(1));
    }

    #[tokio::test]
    async fn unless_expired_refetches_expired_entries() {
        use StashPolicy::StashUnlessExpired as P;
        assert_eq!(runner(Slot::Absent, P).state().await, StashState::Source);
        assert_eq!(runner(Slot::Fresh, P).state().await, StashState::Stash(Some(1)));
        assert_eq!(runner(Slot::Expired, P).state().await, StashState::Source);
    }

    #[tokio::test]
    async fn stash_only_never_calls_source() {
        use StashPolicy::StashOnlyNoSource as P;
        assert_eq!(runner(Slot::Absent, P).state().await, StashState::Stash(None));
        assert_eq!(runner(Slot::Fresh, P).state().await, StashState::Stash(Some(1)));
        assert_eq!(runner(Slot::Expired, P).state().await, StashState::Stash(Some(1)));
    }
}
