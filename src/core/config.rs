//! # Processor configuration.
//!
//! Provides [`Config`], the settings shared by every request a
//! [`RequestProcessor`](crate::RequestProcessor) handles.
//!
//! ## Sentinel values
//! - `source_timeout = 0s` → no timeout on physical source calls
//! - `terminal_spacing = 0s` → terminal notifications are never held back
//! - `bus_capacity = 0` → clamped to 1

use std::time::Duration;

use crate::policies::StashPolicy;

/// Configuration for a request processor.
///
/// ## Field semantics
/// - `default_policy`: policy applied when params carry [`StashPolicy::Default`]
/// - `terminal_spacing`: minimum gap between a replayed value and the terminal notification after it
/// - `bus_capacity`: event bus ring buffer size (min 1)
/// - `source_timeout`: per-call timeout for physical source executions (`0s` = none)
///
/// ## Notes
/// All fields are public. Prefer the helper accessors to avoid sprinkling
/// sentinel checks (`0`) across the codebase.
#[derive(Clone, Debug)]
pub struct Config {
    /// Policy used when a request does not choose one.
    ///
    /// Setting this to [`StashPolicy::Default`] itself falls back to
    /// [`StashPolicy::StashThenSourceIfExpired`].
    pub default_policy: StashPolicy,

    /// Hold-back before delivering a terminal notification that closely follows a value.
    ///
    /// Only the receiving caller waits; the execution never does.
    pub terminal_spacing: Duration,

    /// Capacity of the event bus broadcast channel ring buffer.
    ///
    /// Slow listeners that lag behind more than `bus_capacity` events skip older items.
    pub bus_capacity: usize,

    /// Timeout for one physical source call.
    ///
    /// - `Duration::ZERO` = no timeout
    /// - `> 0` = the call is cancelled and fails with [`SourceError::Failed`](crate::SourceError::Failed)
    pub source_timeout: Duration,
}

impl Config {
    /// Returns the source timeout as an `Option`.
    #[inline]
    pub fn source_timeout(&self) -> Option<Duration> {
        if self.source_timeout.is_zero() {
            None
        } else {
            Some(self.source_timeout)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Resolves the policy a request actually runs with.
    #[inline]
    pub fn resolve_policy(&self, requested: StashPolicy) -> StashPolicy {
        requested.resolve(self.default_policy)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `default_policy = StashThenSourceIfExpired`
    /// - `terminal_spacing = 20ms`
    /// - `bus_capacity = 1024`
    /// - `source_timeout = 0s` (no timeout)
    fn default() -> Self {
        Self {
            default_policy: StashPolicy::StashThenSourceIfExpired,
            terminal_spacing: Duration::from_millis(20),
            bus_capacity: 1024,
            source_timeout: Duration::ZERO,
        }
    }
}
