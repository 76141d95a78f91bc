//! # Stash entries: metadata, payload and lazy reading.
//!
//! A stash backend hands out a [`LazyEntry`] per hit. The entry reads its
//! metadata and payload on demand through the backend's [`EntryReader`] and
//! releases the reader as soon as both parts were read. Dropping a
//! [`LazyEntry`] releases the reader too, so the underlying resource is
//! returned on every exit path, including errors and cancelled futures.
//!
//! ```text
//! backend.get(key) ──► LazyEntry { reader }
//!                          ├─ metadata() ──► reader.metadata()  (cached)
//!                          ├─ payload()  ──► reader.payload()   (cached)
//!                          └─ both read / drop ──► reader.release() (once)
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StashError;

/// Bound shared by every value type flowing through stashes, sources and aggregates.
pub trait Payload: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Payload for T {}

/// Bookkeeping stored alongside a payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Metadata {
    /// When the payload was last written.
    pub updated: DateTime<Utc>,
    /// Ordered, opaque tags computed when the payload was written.
    pub tags: Vec<String>,
}

impl Metadata {
    /// Metadata stamped with the current wall-clock time.
    pub fn now(tags: Vec<String>) -> Self {
        Self {
            updated: Utc::now(),
            tags,
        }
    }

    /// Metadata with an explicit timestamp.
    pub fn at(updated: DateTime<Utc>, tags: Vec<String>) -> Self {
        Self { updated, tags }
    }

    /// Time elapsed since the last write (zero if `updated` is in the future).
    pub fn age(&self) -> Duration {
        (Utc::now() - self.updated).to_std().unwrap_or(Duration::ZERO)
    }

    /// True if `tag` is among the stored tags.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// A fully read stash entry.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry<T> {
    /// Metadata stored with the payload.
    pub metadata: Metadata,
    /// The stored value.
    pub payload: T,
}

impl<T> Entry<T> {
    /// Creates an entry.
    pub fn new(metadata: Metadata, payload: T) -> Self {
        Self { metadata, payload }
    }

    /// Creates an entry stamped now, without tags.
    pub fn fresh(payload: T) -> Self {
        Self::new(Metadata::now(Vec::new()), payload)
    }
}

/// Backend-side handle reading one entry in two independent parts.
///
/// Implementations hold whatever resource backs the entry (file handle,
/// transaction, buffer lease). [`release`](EntryReader::release) is called
/// exactly once by the owning [`LazyEntry`].
#[async_trait]
pub trait EntryReader<T>: Send {
    /// Reads the metadata part.
    async fn metadata(&mut self) -> Result<Metadata, StashError>;

    /// Reads the payload part. `Ok(None)` means the stored payload is null.
    async fn payload(&mut self) -> Result<Option<T>, StashError>;

    /// Releases the underlying resource.
    fn release(&mut self) {}
}

/// Lazily read entry handed out by a [`StashBackend`](crate::StashBackend).
pub struct LazyEntry<T> {
    key: String,
    reader: Option<Box<dyn EntryReader<T>>>,
    metadata: Option<Metadata>,
    payload: Option<Option<T>>,
}

impl<T: Payload> LazyEntry<T> {
    /// Wraps a backend reader.
    pub fn new(key: impl Into<String>, reader: impl EntryReader<T> + 'static) -> Self {
        Self {
            key: key.into(),
            reader: Some(Box::new(reader)),
            metadata: None,
            payload: None,
        }
    }

    /// An entry whose parts are already in memory (no reader to release).
    pub fn loaded(key: impl Into<String>, entry: Entry<T>) -> Self {
        Self {
            key: key.into(),
            reader: None,
            metadata: Some(entry.metadata),
            payload: Some(Some(entry.payload)),
        }
    }

    /// Key this entry was read from.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// True once the backend reader has been released.
    pub fn is_released(&self) -> bool {
        self.reader.is_none()
    }

    /// Reads (once) and returns the metadata.
    pub async fn metadata(&mut self) -> Result<Metadata, StashError> {
        let metadata = match self.metadata.take() {
            Some(m) => m,
            None => {
                let read = self.reader_mut()?.metadata().await;
                self.release_on_error(read)?
            }
        };
        self.metadata = Some(metadata.clone());
        self.release_if_drained();
        Ok(metadata)
    }

    /// Reads (once) and returns the payload.
    pub async fn payload(&mut self) -> Result<Option<T>, StashError> {
        let payload = match self.payload.take() {
            Some(p) => p,
            None => {
                let read = self.reader_mut()?.payload().await;
                self.release_on_error(read)?
            }
        };
        self.payload = Some(payload.clone());
        self.release_if_drained();
        Ok(payload)
    }

    /// Reads both parts. `Ok(None)` when the stored payload is null.
    pub async fn into_entry(mut self) -> Result<Option<Entry<T>>, StashError> {
        let metadata = self.metadata().await?;
        let payload = self.payload().await?;
        Ok(payload.map(|payload| Entry { metadata, payload }))
    }

    /// Releases the backend reader now. Idempotent.
    pub fn release(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            reader.release();
        }
    }

    fn reader_mut(&mut self) -> Result<&mut Box<dyn EntryReader<T>>, StashError> {
        let key = &self.key;
        self.reader
            .as_mut()
            .ok_or_else(|| StashError::Unreadable { key: key.clone() })
    }

    fn release_on_error<V>(&mut self, read: Result<V, StashError>) -> Result<V, StashError> {
        if read.is_err() {
            self.release();
        }
        read
    }

    fn release_if_drained(&mut self) {
        if self.metadata.is_some() && self.payload.is_some() {
            self.release();
        }
    }
}

impl<T> Drop for LazyEntry<T> {
    fn drop(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            reader.release();
        }
    }
}

impl<T> std::fmt::Debug for LazyEntry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyEntry")
            .field("key", &self.key)
            .field("released", &self.reader.is_none())
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reader that counts releases and can fail on payload.
    struct CountingReader {
        releases: Arc<AtomicUsize>,
        value: Option<u32>,
        fail_payload: bool,
    }

    #[async_trait]
    impl EntryReader<u32> for CountingReader {
        async fn metadata(&mut self) -> Result<Metadata, StashError> {
            Ok(Metadata::now(vec!["t".into()]))
        }

        async fn payload(&mut self) -> Result<Option<u32>, StashError> {
            if self.fail_payload {
                return Err(StashError::backend("corrupt"));
            }
            Ok(self.value)
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn reader(value: Option<u32>, fail_payload: bool) -> (CountingReader, Arc<AtomicUsize>) {
        let releases = Arc::new(AtomicUsize::new(0));
        let r = CountingReader {
            releases: releases.clone(),
            value,
            fail_payload,
        };
        (r, releases)
    }

    #[tokio::test]
    async fn released_once_after_both_parts() {
        let (r, releases) = reader(Some(7), false);
        let mut entry = LazyEntry::new("k", r);

        entry.metadata().await.unwrap();
        assert_eq!(releases.load(Ordering::SeqCst), 0);
        assert_eq!(entry.payload().await.unwrap(), Some(7));
        assert_eq!(releases.load(Ordering::SeqCst), 1);

        // Cached reads do not touch the released reader.
        assert_eq!(entry.payload().await.unwrap(), Some(7));
        drop(entry);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn released_on_drop_when_partially_read() {
        let (r, releases) = reader(Some(1), false);
        let mut entry = LazyEntry::new("k", r);
        entry.metadata().await.unwrap();
        drop(entry);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn released_on_read_error() {
        let (r, releases) = reader(Some(1), true);
        let entry = LazyEntry::new("k", r);
        assert!(entry.into_entry().await.is_err());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn null_payload_is_not_an_entry() {
        let (r, _) = reader(None, false);
        assert_eq!(LazyEntry::new("k", r).into_entry().await.unwrap(), None);
    }
}
