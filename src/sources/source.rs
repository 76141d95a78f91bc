//! # Source abstraction.
//!
//! A [`Source`] is the slow producer behind a request (remote service,
//! database, expensive computation). It yields zero or one value per call.
//! The shared handle type is [`SourceRef`], an `Arc<dyn Source<P, T>>`.
//!
//! A source receives a [`CancellationToken`]; it is cancelled when every
//! caller waiting on the execution has gone away.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::SourceError;

/// # Asynchronous, cancelable producer of `T` for params `P`.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use tokio_util::sync::CancellationToken;
/// use stashkit::{KeyParams, Source, SourceError};
///
/// struct Echo;
///
/// #[async_trait]
/// impl Source<KeyParams, String> for Echo {
///     fn name(&self) -> &str { "echo" }
///
///     async fn fetch(&self, params: &KeyParams, ctx: CancellationToken) -> Result<Option<String>, SourceError> {
///         if ctx.is_cancelled() {
///             return Err(SourceError::Cancelled);
///         }
///         Ok(Some(params.key().to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait Source<P, T>: Send + Sync + 'static {
    /// Stable, human-readable name used in logs and events.
    fn name(&self) -> &str;

    /// Produces the value for `params`. `Ok(None)` is an empty success.
    async fn fetch(&self, params: &P, ctx: CancellationToken) -> Result<Option<T>, SourceError>;
}

/// Shared handle to a source.
pub type SourceRef<P, T> = Arc<dyn Source<P, T>>;
