//! # Stash policies for requests.
//!
//! [`StashPolicy`] decides, per request, how the stash (local cache) and the
//! source (remote producer) are combined.
//!
//! ## Choosing the right policy
//!
//! ```text
//! SourceOnlyNoStash        → call source, never touch the stash
//! StashOnlyNoSource        → read the stash, never call the source
//! Source                   → call source, persist the result
//! SourceUnlessError        → call source, persist; on failure read the stash
//! StashThenSource          → emit stash value (if any), always call source too
//! StashThenSourceIfExpired → emit stash value; call source only if expired/absent
//! StashUnlessExpired       → emit stash value only if fresh, otherwise call source
//! Default                  → resolved through `Config::default_policy`
//! ```

/// Policy controlling stash/source precedence and fallback for one request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StashPolicy {
    /// Call the source only; the stash is neither read nor written.
    SourceOnlyNoStash,
    /// Read the stash only; the source is never called.
    StashOnlyNoSource,
    /// Always call the source and persist its result. The stash is not read.
    Source,
    /// Call the source and persist its result; on failure (or an empty
    /// result) fall back to the stash value.
    SourceUnlessError,
    /// Emit the stash value if present, then always call the source.
    StashThenSource,
    /// Emit the stash value if present; call the source only when the
    /// value is expired or absent.
    StashThenSourceIfExpired,
    /// Emit the stash value only while it is unexpired; otherwise call the
    /// source and emit its value alone.
    StashUnlessExpired,
    /// Placeholder resolved through [`Config::default_policy`](crate::Config::default_policy).
    #[default]
    Default,
}

impl StashPolicy {
    /// Resolves [`StashPolicy::Default`] to `fallback`; every other policy resolves to itself.
    ///
    /// A `Default` fallback resolves to [`StashPolicy::StashThenSourceIfExpired`].
    ///
    /// # Example
    /// ```
    /// use stashkit::StashPolicy;
    ///
    /// assert_eq!(
    ///     StashPolicy::Default.resolve(StashPolicy::Source),
    ///     StashPolicy::Source
    /// );
    /// assert_eq!(
    ///     StashPolicy::StashOnlyNoSource.resolve(StashPolicy::Source),
    ///     StashPolicy::StashOnlyNoSource
    /// );
    /// ```
    pub fn resolve(self, fallback: StashPolicy) -> StashPolicy {
        match (self, fallback) {
            (StashPolicy::Default, StashPolicy::Default) => StashPolicy::StashThenSourceIfExpired,
            (StashPolicy::Default, other) => other,
            (own, _) => own,
        }
    }

    /// True when an expired stash value is still worth emitting under this policy.
    pub fn tolerates_expiry(self) -> bool {
        matches!(
            self,
            StashPolicy::StashOnlyNoSource
                | StashPolicy::StashThenSource
                | StashPolicy::StashThenSourceIfExpired
        )
    }

    /// True when this policy may call the source.
    pub fn calls_source(self) -> bool {
        !matches!(self, StashPolicy::StashOnlyNoSource)
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(self) -> &'static str {
        match self {
            StashPolicy::SourceOnlyNoStash => "source_only_no_stash",
            StashPolicy::StashOnlyNoSource => "stash_only_no_source",
            StashPolicy::Source => "source",
            StashPolicy::SourceUnlessError => "source_unless_error",
            StashPolicy::StashThenSource => "stash_then_source",
            StashPolicy::StashThenSourceIfExpired => "stash_then_source_if_expired",
            StashPolicy::StashUnlessExpired => "stash_unless_expired",
            StashPolicy::Default => "default",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_never_survives_resolution() {
        assert_eq!(
            StashPolicy::Default.resolve(StashPolicy::Default),
            StashPolicy::StashThenSourceIfExpired
        );
    }

    #[test]
    fn expiry_tolerance() {
        assert!(StashPolicy::StashThenSource.tolerates_expiry());
        assert!(StashPolicy::StashThenSourceIfExpired.tolerates_expiry());
        assert!(StashPolicy::StashOnlyNoSource.tolerates_expiry());
        assert!(!StashPolicy::StashUnlessExpired.tolerates_expiry());
        assert!(!StashPolicy::Source.tolerates_expiry());
    }

    #[test]
    fn only_stash_only_skips_the_source() {
        assert!(!StashPolicy::StashOnlyNoSource.calls_source());
        for policy in [
            StashPolicy::SourceOnlyNoStash,
            StashPolicy::Source,
            StashPolicy::SourceUnlessError,
            StashPolicy::StashThenSource,
            StashPolicy::StashThenSourceIfExpired,
            StashPolicy::StashUnlessExpired,
        ] {
            assert!(policy.calls_source(), "{}", policy.as_label());
        }
    }
}
