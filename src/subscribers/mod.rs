//! # Event subscribers.
//!
//! ```text
//! Bus ──► subscriber listener ──► SubscriberSet ──┬──► LogWriter (feature "logging")
//!                                                 ├──► Metrics
//!                                                 └──► Custom ...
//! ```
//!
//! - [`Subscribe`]: the extension trait.
//! - [`SubscriberSet`]: bounded per-subscriber queues and workers.
//! - [`LogWriter`]: built-in `tracing` writer behind the `logging` feature.

#[cfg(feature = "logging")]
mod embedded;
mod set;
mod subscribe;

#[cfg(feature = "logging")]
pub use embedded::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
