//! Request and refresh policies.
//!
//! This module groups the knobs that control **where** a request's data comes
//! from and **how long** an open-ended aggregate waits after a failed refresh.
//!
//! ## Contents
//! - [`StashPolicy`]   stash vs. source precedence and fallback for one request
//! - [`BackoffPolicy`] retry delays for failed open-ended refreshes
//! - [`JitterPolicy`]  randomization of those delays
//!
//! ## Quick wiring
//! ```text
//! Params::policy() ──► StashPolicy::resolve(Config::default_policy)
//!      └─► core::blueprint::Blueprint::select picks the execution plan
//!
//! Aggregable::open_ended(..).with_retry(BackoffPolicy)
//!      └─► aggregate::open_ended driver uses backoff.next(failures)
//! ```

mod backoff;
mod jitter;
mod stash;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use stash::StashPolicy;
