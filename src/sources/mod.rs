//! Sources and the descriptors around them.
//!
//! - [`Params`] / [`KeyParams`] identify one logical request.
//! - [`Source`] / [`SourceFn`] produce values.
//! - [`SourceSpec`] attaches network, prepare, stash and aggregation capabilities.
//! - [`NetworkStatus`] answers whether network-required sources may run.

mod network;
mod params;
mod source;
mod source_fn;
mod spec;

pub use network::{AlwaysConnected, NetworkFlag, NetworkStatus};
pub use params::{KeyParams, Params};
pub use source::{Source, SourceRef};
pub use source_fn::SourceFn;
pub use spec::{PrepareFn, SourceSpec};
