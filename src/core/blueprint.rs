//! # Execution plan for one request.
//!
//! [`Blueprint::select`] turns a resolved [`StashPolicy`] and the request's
//! [`Stashable`] into the plan the processor executes.
//!
//! ```text
//! SourceOnlyNoStash ───────────────────────────────► SourceOnly
//! no usable stash ──┬─ StashOnlyNoSource ──────────► Nothing
//!                   └─ otherwise ──────────────────► SourceOnly
//! StashOnlyNoSource ───────────────────────────────► StashOnly
//! Source ──────────────────────────────────────────► SourceAndSave
//! SourceUnlessError ───────────────────────────────► SourceAndSaveOrStash
//! StashThenSource / ..IfExpired / StashUnlessExpired ► StashState (decided by StashRunner)
//! ```

use crate::core::runner::StashRunner;
use crate::policies::StashPolicy;
use crate::stash::{Payload, Stash, Stashable};

/// Resolved plan for one request.
#[derive(Debug)]
pub enum Blueprint<T> {
    /// No stash and no source: emit nothing.
    Nothing,
    /// Call the source; nothing is persisted.
    SourceOnly,
    /// Read the stash only.
    StashOnly(Stash<T>),
    /// Call the source and persist the result.
    SourceAndSave(Stash<T>),
    /// Call the source and persist; on failure or empty result read the stash.
    SourceAndSaveOrStash(Stash<T>),
    /// Let the stash validity check decide.
    StashState(StashRunner<T>),
}

impl<T: Payload> Blueprint<T> {
    /// Selects the plan. `policy` must already be resolved (never `Default`).
    pub fn select<P>(policy: StashPolicy, stashable: Option<&Stashable<P, T>>, params: &P) -> Self
    where
        P: Send + Sync + 'static,
    {
        if policy == StashPolicy::SourceOnlyNoStash {
            return Blueprint::SourceOnly;
        }

        let Some((stashable, stash)) = stashable.and_then(|s| s.stash(params).map(|stash| (s, stash))) else {
            return if policy.calls_source() {
                Blueprint::SourceOnly
            } else {
                Blueprint::Nothing
            };
        };

        match policy {
            StashPolicy::StashOnlyNoSource => Blueprint::StashOnly(stash),
            StashPolicy::Source => Blueprint::SourceAndSave(stash),
            StashPolicy::SourceUnlessError => Blueprint::SourceAndSaveOrStash(stash),
            _ => Blueprint::StashState(StashRunner::new(stash, stashable.expiry().clone(), policy)),
        }
    }

    /// Stable snake_case label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Blueprint::Nothing => "nothing",
            Blueprint::SourceOnly => "source_only",
            Blueprint::StashOnly(_) => "stash_only",
            Blueprint::SourceAndSave(_) => "source_and_save",
            Blueprint::SourceAndSaveOrStash(_) => "source_and_save_or_stash",
            Blueprint::StashState(_) => "stash_state",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::KeyParams;
    use crate::stash::{MemoryStash, StashBackend};
    use std::sync::Arc;

    fn with_stash() -> Stashable<KeyParams, u32> {
        let backend: Arc<dyn StashBackend<u32>> = Arc::new(MemoryStash::new());
        Stashable::backed_by(backend)
    }

    fn label(policy: StashPolicy, stashable: Option<&Stashable<KeyParams, u32>>) -> &'static str {
        Blueprint::select(policy, stashable, &KeyParams::new("k")).as_label()
    }

    #[test]
    fn plans_with_a_stash() {
        let s = with_stash();
        let s = Some(&s);
        assert_eq!(label(StashPolicy::SourceOnlyNoStash, s), "source_only");
        assert_eq!(label(StashPolicy::StashOnlyNoSource, s), "stash_only");
        assert_eq!(label(StashPolicy::Source, s), "source_and_save");
        assert_eq!(label(StashPolicy::SourceUnlessError, s), "source_and_save_or_stash");
        assert_eq!(label(StashPolicy::StashThenSource, s), "stash_state");
        assert_eq!(label(StashPolicy::StashThenSourceIfExpired, s), "stash_state");
        assert_eq!(label(StashPolicy::StashUnlessExpired, s), "stash_state");
    }

    #[test]
    fn plans_without_a_stash() {
        assert_eq!(label(StashPolicy::StashOnlyNoSource, None), "nothing");
        assert_eq!(label(StashPolicy::Source, None), "source_only");
        assert_eq!(label(StashPolicy::StashThenSource, None), "source_only");

        let unusable: Stashable<KeyParams, u32> = Stashable::new(|_| None);
        assert_eq!(label(StashPolicy::StashOnlyNoSource, Some(&unusable)), "nothing");
        assert_eq!(label(StashPolicy::SourceUnlessError, Some(&unusable)), "source_only");
    }
}
