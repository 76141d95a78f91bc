//! Stash layer: cached entries over pluggable backends.
//!
//! ## Contents
//! - [`Metadata`], [`Entry`], [`LazyEntry`], [`EntryReader`] stored data and lazy reading
//! - [`StashBackend`], [`MemoryStash`] backend boundary and the in-memory backend
//! - [`Stash`] one slot; [`Stash::combine`] chains two tiers
//! - [`Stashable`], [`Expiry`] per-request slot resolution, expiry and tags
//!
//! ## Error policy
//! Read failures are logged and treated as a miss. Write and remove failures
//! are returned to the caller; for combined slots only when both tiers fail.

mod backend;
mod entry;
mod slot;
mod stashable;

pub use backend::{MemoryStash, StashBackend};
pub use entry::{Entry, EntryReader, LazyEntry, Metadata, Payload};
pub use slot::Stash;
pub use stashable::{Expiry, Stashable};
