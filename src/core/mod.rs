//! Request core: planning and orchestration.
//!
//! The public entry point is [`RequestProcessor`], built through
//! [`ProcessorBuilder`].
//!
//! Internal modules:
//! - [`config`]: processor-wide settings;
//! - [`blueprint`]: policy + stash configuration → execution plan;
//! - [`runner`]: stash validity check for the deferred plans;
//! - [`source`]: one logical source call (network, timeout, prepare, aggregation);
//! - [`processor`]: progress composition, saving, the public request API;
//! - [`builder`]: wiring of bus, subscribers and network probe.

mod blueprint;
mod builder;
mod config;
mod processor;
mod runner;
mod source;

pub use blueprint::Blueprint;
pub use builder::ProcessorBuilder;
pub use config::Config;
pub use processor::RequestProcessor;
pub use runner::{StashRunner, StashState};
pub use source::SourceProcessor;
