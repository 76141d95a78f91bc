//! Runtime events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `RequestProcessor` (stash write failures), `SourceProcessor`
//!   (source calls and failures), the aggregator (aggregate lifecycle, refreshes),
//!   `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the subscriber listener spawned by
//!   [`ProcessorBuilder::build`](crate::ProcessorBuilder::build), fanning out to a
//!   [`SubscriberSet`](crate::SubscriberSet).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
