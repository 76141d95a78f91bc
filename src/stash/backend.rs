//! # Pluggable stash backends.
//!
//! [`StashBackend`] is the boundary to whatever actually stores entries
//! (memory, files, an embedded database). The crate ships [`MemoryStash`];
//! persistent backends live outside it.
//!
//! ## Contract
//! - Implementations must be safe under concurrent calls; the crate never
//!   assumes exclusive access.
//! - `get` returns a [`LazyEntry`] so metadata and payload can be read
//!   independently (e.g. expiry checks without decoding the payload).
//! - `put` returns the stored payload on success.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::StashError;
use crate::stash::entry::{Entry, LazyEntry, Payload};

/// Storage worker behind one or more [`Stash`](crate::Stash) slots.
#[async_trait]
pub trait StashBackend<T>: Send + Sync + 'static {
    /// Looks up `key`. `Ok(None)` on a miss.
    async fn get(&self, key: &str) -> Result<Option<LazyEntry<T>>, StashError>;

    /// Stores `entry` under `key`, returning the stored payload.
    async fn put(&self, key: &str, entry: Entry<T>) -> Result<T, StashError>;

    /// Removes `key`. Returns whether something was removed.
    async fn remove(&self, key: &str) -> Result<bool, StashError>;
}

/// In-memory backend keyed by string.
pub struct MemoryStash<T> {
    entries: RwLock<HashMap<String, Entry<T>>>,
}

impl<T> Default for MemoryStash<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: Payload> MemoryStash<T> {
    /// Creates an empty stash.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Snapshot of the entry under `key`, bypassing lazy reading.
    pub fn peek(&self, key: &str) -> Option<Entry<T>> {
        self.entries.read().get(key).cloned()
    }

    /// Stores an entry synchronously (seeding, tests).
    pub fn insert(&self, key: impl Into<String>, entry: Entry<T>) {
        self.entries.write().insert(key.into(), entry);
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[async_trait]
impl<T: Payload> StashBackend<T> for MemoryStash<T> {
    async fn get(&self, key: &str) -> Result<Option<LazyEntry<T>>, StashError> {
        Ok(self.peek(key).map(|entry| LazyEntry::loaded(key, entry)))
    }

    async fn put(&self, key: &str, entry: Entry<T>) -> Result<T, StashError> {
        let payload = entry.payload.clone();
        self.insert(key, entry);
        Ok(payload)
    }

    async fn remove(&self, key: &str) -> Result<bool, StashError> {
        Ok(self.entries.write().remove(key).is_some())
    }
}
