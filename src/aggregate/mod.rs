//! In-flight request aggregation.
//!
//! ## Contents
//! - [`Aggregable`] deduplication key, keep-alive and refresh schedule
//! - [`NotificationNode`], [`Notification`] append-only event history of one execution
//! - registry (crate-internal) lookup-or-create, attach/detach, eviction, cancellation
//! - replay (crate-internal) per-caller stream over the history
//! - open-ended driver (crate-internal) scheduled refreshes while callers are attached
//!
//! The registry module carries the lifecycle diagram.

mod aggregable;
mod node;
mod open_ended;
pub(crate) mod registry;
mod replay;

pub use aggregable::Aggregable;
pub use node::{Notification, NotificationNode};
