//! # Function-backed source (`SourceFn`)
//!
//! [`SourceFn`] wraps a closure `F: Fn(P, CancellationToken) -> Fut`, producing a
//! fresh future per fetch. The closure gets its own clone of the params so the
//! future can be `'static`.
//!
//! ## Example
//! ```rust
//! use tokio_util::sync::CancellationToken;
//! use stashkit::{KeyParams, SourceError, SourceFn, SourceRef};
//!
//! let s: SourceRef<KeyParams, usize> = SourceFn::arc("length", |p: KeyParams, _ctx: CancellationToken| async move {
//!     Ok::<_, SourceError>(Some(p.key().len()))
//! });
//!
//! assert_eq!(s.name(), "length");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::SourceError;
use crate::sources::source::Source;

/// Function-backed source implementation.
pub struct SourceFn<P, F> {
    name: Cow<'static, str>,
    f: F,
    _params: PhantomData<fn(P)>,
}

impl<P, F> SourceFn<P, F> {
    /// Creates a new function-backed source.
    ///
    /// Prefer [`SourceFn::arc`] when you immediately need a [`SourceRef`](crate::SourceRef).
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
            _params: PhantomData,
        }
    }

    /// Creates the source and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

impl<P, F> std::fmt::Debug for SourceFn<P, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceFn").field("name", &self.name).finish_non_exhaustive()
    }
}

#[async_trait]
impl<P, T, F, Fut> Source<P, T> for SourceFn<P, F>
where
    P: Clone + Send + Sync + 'static,
    T: Send + 'static,
    F: Fn(P, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<T>, SourceError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, params: &P, ctx: CancellationToken) -> Result<Option<T>, SourceError> {
        (self.f)(params.clone(), ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{KeyParams, SourceRef};

    #[tokio::test]
    async fn closure_receives_params_and_token() {
        let s: SourceRef<KeyParams, String> =
            SourceFn::arc("upper", |p: KeyParams, ctx: CancellationToken| async move {
                if ctx.is_cancelled() {
                    return Err(SourceError::Cancelled);
                }
                Ok(Some(p.key().to_uppercase()))
            });

        let out = s.fetch(&KeyParams::new("abc"), CancellationToken::new()).await;
        assert_eq!(out, Ok(Some("ABC".to_string())));

        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(s.fetch(&KeyParams::new("abc"), token).await, Err(SourceError::Cancelled));
    }
}
