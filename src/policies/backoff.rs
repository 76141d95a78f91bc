//! # Retry delays for failed refreshes of open-ended aggregates.
//!
//! An open-ended aggregate keeps re-running its source on a schedule. When a
//! refresh fails and the aggregable carries a [`BackoffPolicy`], the error is
//! reported but the stream stays open; the next attempt runs after
//! `first × factor^failures`, capped at `max`, with jitter applied on top.
//!
//! The base delay depends on the number of consecutive failures only, so
//! jitter never feeds back into later delays.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use stashkit::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(250),
//!     max: Duration::from_secs(4),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(250));
//! assert_eq!(backoff.next(2), Duration::from_secs(1));
//! assert_eq!(backoff.next(9), Duration::from_secs(4));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Retry backoff for failed refreshes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub first: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Multiplicative growth per consecutive failure (`>= 1.0` recommended).
    pub factor: f64,
    /// Randomization applied to the capped delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// `first = 1s`, `factor = 2.0`, `max = 60s`, no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(60),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// A fixed delay between retries.
    pub fn constant(delay: Duration) -> Self {
        Self {
            first: delay,
            max: delay,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Delay before the next attempt after `failures` consecutive failures (0-indexed).
    pub fn next(&self, failures: u32) -> Duration {
        let exp = failures.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let capped = if secs.is_finite() && secs >= 0.0 && secs <= self.max.as_secs_f64() {
            Duration::from_secs_f64(secs)
        } else {
            self.max
        };
        self.jitter.apply(capped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doubling() -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(2),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn grows_until_capped() {
        let p = doubling();
        assert_eq!(p.next(0), Duration::from_millis(100));
        assert_eq!(p.next(1), Duration::from_millis(200));
        assert_eq!(p.next(3), Duration::from_millis(800));
        assert_eq!(p.next(5), Duration::from_secs(2));
    }

    #[test]
    fn overflow_is_capped() {
        assert_eq!(doubling().next(u32::MAX), Duration::from_secs(2));
    }

    #[test]
    fn first_above_max_is_capped() {
        let p = BackoffPolicy {
            first: Duration::from_secs(10),
            ..doubling()
        };
        assert_eq!(p.next(0), Duration::from_secs(2));
    }

    #[test]
    fn constant_never_changes() {
        let p = BackoffPolicy::constant(Duration::from_millis(300));
        for failures in 0..20 {
            assert_eq!(p.next(failures), Duration::from_millis(300));
        }
    }

    #[test]
    fn equal_jitter_stays_in_upper_half() {
        let p = BackoffPolicy {
            jitter: JitterPolicy::Equal,
            ..BackoffPolicy::constant(Duration::from_millis(1000))
        };
        for failures in 0..50 {
            let d = p.next(failures);
            assert!(d >= Duration::from_millis(500), "{d:?}");
            assert!(d <= Duration::from_millis(1000), "{d:?}");
        }
    }
}
