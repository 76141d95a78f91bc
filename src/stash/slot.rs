//! # Stash: one logical cache slot.
//!
//! A [`Stash`] binds a key to a [`StashBackend`]. Read errors are logged and
//! reported as misses; write and remove errors are returned.
//!
//! ## Two tiers
//! [`Stash::combine`] chains a fast primary with a fallback secondary:
//! ```text
//! get:    primary ── hit ──► value
//!            └─ miss / unreadable / null ──► secondary ── hit ──► put into primary ──► value
//! put:    primary ┐
//!                 ├─ both; Ok if either Ok, Combined error if both fail
//! remove: secondary┘
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StashError;
use crate::stash::backend::StashBackend;
use crate::stash::entry::{Entry, LazyEntry, Payload};
use crate::stash::stashable::Expiry;

/// Read/write/remove endpoint for one key of one backend.
pub struct Stash<T> {
    key: Arc<str>,
    backend: Arc<dyn StashBackend<T>>,
}

impl<T> Clone for Stash<T> {
    fn clone(&self) -> Self {
        Self {
            key: Arc::clone(&self.key),
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<T: Payload> Stash<T> {
    /// Creates a slot for `key` in `backend`.
    pub fn new(key: impl Into<Arc<str>>, backend: Arc<dyn StashBackend<T>>) -> Self {
        Self {
            key: key.into(),
            backend,
        }
    }

    /// Key of this slot.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Looks the entry up without reading it; backend errors are returned.
    pub async fn try_get_lazy(&self) -> Result<Option<LazyEntry<T>>, StashError> {
        self.backend.get(&self.key).await
    }

    /// Looks the entry up without reading it; backend errors count as a miss.
    pub async fn get_lazy(&self) -> Option<LazyEntry<T>> {
        match self.try_get_lazy().await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "stash read failed, treating as miss");
                None
            }
        }
    }

    /// Reads the whole entry; errors and null payloads count as a miss.
    pub async fn get(&self) -> Option<Entry<T>> {
        let lazy = self.get_lazy().await?;
        match lazy.into_entry().await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "stash entry unreadable, treating as miss");
                None
            }
        }
    }

    /// Reads the entry only if `expiry` does not consider it expired.
    ///
    /// The payload is not read for expired entries.
    pub async fn get_unexpired(&self, expiry: &Expiry) -> Option<Entry<T>> {
        let mut lazy = self.get_lazy().await?;
        let metadata = match lazy.metadata().await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "stash metadata unreadable");
                return None;
            }
        };
        if expiry.is_expired(&metadata) {
            return None;
        }
        match lazy.payload().await {
            Ok(payload) => payload.map(|payload| Entry { metadata, payload }),
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "stash payload unreadable");
                None
            }
        }
    }

    /// Stores `entry`, returning the stored payload.
    pub async fn put(&self, entry: Entry<T>) -> Result<T, StashError> {
        self.backend.put(&self.key, entry).await
    }

    /// Removes the entry. Returns whether something was removed.
    pub async fn remove(&self) -> Result<bool, StashError> {
        self.backend.remove(&self.key).await
    }

    /// Chains `self` (primary) with `secondary`.
    ///
    /// The combined slot keeps the primary's key.
    pub fn combine(self, secondary: Stash<T>) -> Stash<T> {
        let key = Arc::clone(&self.key);
        Stash {
            key,
            backend: Arc::new(Combined {
                primary: self,
                secondary,
            }),
        }
    }
}

impl<T> std::fmt::Debug for Stash<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stash").field("key", &self.key).finish_non_exhaustive()
    }
}

/// Backend of a combined slot. Ignores the key it is called with; each tier
/// uses its own.
struct Combined<T> {
    primary: Stash<T>,
    secondary: Stash<T>,
}

#[async_trait]
impl<T: Payload> StashBackend<T> for Combined<T> {
    async fn get(&self, _key: &str) -> Result<Option<LazyEntry<T>>, StashError> {
        // Unreadable or null primary entries count as misses.
        let primary_err = match read_entry(&self.primary).await {
            Ok(Some(entry)) => return Ok(Some(LazyEntry::loaded(self.primary.key(), entry))),
            Ok(None) => None,
            Err(e) => Some(e),
        };

        let entry = match (read_entry(&self.secondary).await, primary_err) {
            (Ok(Some(entry)), _) => entry,
            (Ok(None), None) => return Ok(None),
            (Ok(None), Some(p)) => {
                tracing::warn!(key = %self.primary.key, error = %p, "primary stash read failed");
                return Ok(None);
            }
            (Err(s), None) => return Err(s),
            (Err(s), Some(p)) => {
                return Err(StashError::Combined {
                    primary: Box::new(p),
                    secondary: Box::new(s),
                });
            }
        };

        if let Err(e) = self.primary.put(entry.clone()).await {
            tracing::warn!(key = %self.primary.key, error = %e, "stash back-fill failed");
        }
        Ok(Some(LazyEntry::loaded(self.primary.key(), entry)))
    }

    async fn put(&self, _key: &str, entry: Entry<T>) -> Result<T, StashError> {
        let (primary, secondary) =
            tokio::join!(self.primary.put(entry.clone()), self.secondary.put(entry));
        match (primary, secondary) {
            (Ok(v), Ok(_)) => Ok(v),
            (Ok(v), Err(e)) | (Err(e), Ok(v)) => {
                tracing::warn!(key = %self.primary.key, error = %e, "one stash tier failed to store");
                Ok(v)
            }
            (Err(p), Err(s)) => Err(StashError::Combined {
                primary: Box::new(p),
                secondary: Box::new(s),
            }),
        }
    }

    async fn remove(&self, _key: &str) -> Result<bool, StashError> {
        let (primary, secondary) = tokio::join!(self.primary.remove(), self.secondary.remove());
        match (primary, secondary) {
            (Ok(a), Ok(b)) => Ok(a || b),
            (Ok(removed), Err(e)) | (Err(e), Ok(removed)) => {
                tracing::warn!(key = %self.primary.key, error = %e, "one stash tier failed to remove");
                Ok(removed)
            }
            (Err(p), Err(s)) => Err(StashError::Combined {
                primary: Box::new(p),
                secondary: Box::new(s),
            }),
        }
    }
}

/// Reads one tier completely; `Ok(None)` on a miss or a null payload.
async fn read_entry<T: Payload>(stash: &Stash<T>) -> Result<Option<Entry<T>>, StashError> {
    match stash.try_get_lazy().await? {
        Some(lazy) => lazy.into_entry().await,
        None => Ok(None),
    }
}
