//! Error types used by sources, stashes and the request processor.
//!
//! This module defines three error enums:
//!
//! - [`SourceError`]: failures of the (slow, remote) producer.
//! - [`StashError`]: failures of a stash backend, possibly combined across tiers.
//! - [`RequestError`]: what a caller of the request API finally observes.
//!
//! All of them provide `as_label` for logging/metrics.

use thiserror::Error;

/// # Errors produced by a source execution.
///
/// Source errors are broadcast to every caller attached to the same aggregate,
/// so the type is `Clone` and carries owned messages only.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The source ran and failed.
    #[error("source failed: {message}")]
    Failed {
        /// The underlying error message.
        message: String,
    },

    /// The source requires network access and none is available.
    #[error("network unavailable")]
    NoNetwork,

    /// The shared execution was cancelled because its last caller detached.
    #[error("source cancelled")]
    Cancelled,

    /// The source completed without producing a value where one was required.
    #[error("source produced no value")]
    Empty,

    /// The source task panicked.
    #[error("source panicked")]
    Panicked,
}

impl SourceError {
    /// Convenience constructor for [`SourceError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        SourceError::Failed {
            message: message.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use stashkit::SourceError;
    ///
    /// assert_eq!(SourceError::NoNetwork.as_label(), "source_no_network");
    /// assert_eq!(SourceError::failed("boom").as_label(), "source_failed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            SourceError::Failed { .. } => "source_failed",
            SourceError::NoNetwork => "source_no_network",
            SourceError::Cancelled => "source_cancelled",
            SourceError::Empty => "source_empty",
            SourceError::Panicked => "source_panicked",
        }
    }
}

/// # Errors produced by stash backends.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StashError {
    /// Backend I/O or storage failure.
    #[error("stash backend error: {message}")]
    Backend {
        /// The underlying error message.
        message: String,
    },

    /// The entry exists but its metadata or payload could not be read.
    #[error("stash entry {key:?} is unreadable")]
    Unreadable {
        /// Key of the entry.
        key: String,
    },

    /// Both tiers of a combined stash failed.
    #[error("both stash tiers failed: primary: {primary}; secondary: {secondary}")]
    Combined {
        /// Error from the primary tier.
        primary: Box<StashError>,
        /// Error from the secondary tier.
        secondary: Box<StashError>,
    },
}

impl StashError {
    /// Convenience constructor for [`StashError::Backend`].
    pub fn backend(message: impl Into<String>) -> Self {
        StashError::Backend {
            message: message.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            StashError::Backend { .. } => "stash_backend",
            StashError::Unreadable { .. } => "stash_unreadable",
            StashError::Combined { .. } => "stash_combined",
        }
    }
}

/// # Errors observed by callers of the request API.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The source failed and the policy provided no fallback.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Direct stash access was requested but no stash is configured for these params.
    #[error("no stash configured for this request")]
    NoStash,
}

impl RequestError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use stashkit::{RequestError, SourceError};
    ///
    /// let err = RequestError::from(SourceError::Cancelled);
    /// assert_eq!(err.as_label(), "source_cancelled");
    /// assert_eq!(RequestError::NoStash.as_label(), "request_no_stash");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RequestError::Source(e) => e.as_label(),
            RequestError::NoStash => "request_no_stash",
        }
    }

    /// Returns the underlying source error, if any.
    pub fn source_error(&self) -> Option<&SourceError> {
        match self {
            RequestError::Source(e) => Some(e),
            RequestError::NoStash => None,
        }
    }
}
