//! # Notification log: append-only history of one execution.
//!
//! A [`NotificationNode`] is an immutable cons-cell holding one notification
//! and a link to the previous node. Holding the latest node keeps the whole
//! chain back to the last reset alive; nodes are shared between subscribers
//! through `Arc`, so appending is O(1) and replay needs no copying of the log.
//!
//! ```text
//! reset ──► [seq 4: root] ◄── [seq 5: Next(a)] ◄── [seq 6: Next(b)] ◄── [seq 7: Completed]
//!                                                                          ▲
//!                                                                       latest
//! subscriber marker = 5  ──► since(5) = [Next(b), Completed]
//! ```
//!
//! ## Rules
//! - `seq` grows by one per node and keeps growing across resets, so a
//!   subscriber's marker stays comparable with any later chain.
//! - Nothing is appended after a terminal notification.
//! - [`NotificationLog`] serializes appends through a `tokio::sync::watch`
//!   sender; receivers are woken on every change.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::SourceError;

/// One event of a physical execution.
#[derive(Clone, Debug, PartialEq)]
pub enum Notification<T> {
    /// A value.
    Next(T),
    /// Terminal failure.
    Error(SourceError),
    /// Terminal success.
    Completed,
}

impl<T> Notification<T> {
    /// True for `Error` and `Completed`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Notification::Next(_))
    }
}

/// Immutable cell of the notification log.
#[derive(Debug)]
pub struct NotificationNode<T> {
    seq: u64,
    at: Instant,
    notification: Option<Notification<T>>,
    prev: Option<Arc<NotificationNode<T>>>,
}

impl<T> NotificationNode<T> {
    /// Empty chain start.
    pub fn root(seq: u64) -> Arc<Self> {
        Arc::new(Self {
            seq,
            at: Instant::now(),
            notification: None,
            prev: None,
        })
    }

    /// New chain whose only node already carries `notification`.
    pub fn root_with(seq: u64, notification: Notification<T>) -> Arc<Self> {
        Arc::new(Self {
            seq,
            at: Instant::now(),
            notification: Some(notification),
            prev: None,
        })
    }

    /// Appends after `self`, returning the new latest node.
    pub fn append(self: &Arc<Self>, notification: Notification<T>) -> Arc<Self> {
        Arc::new(Self {
            seq: self.seq + 1,
            at: Instant::now(),
            notification: Some(notification),
            prev: Some(Arc::clone(self)),
        })
    }

    /// Sequence number of this node.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// When this node was appended.
    pub fn at(&self) -> Instant {
        self.at
    }

    /// Notification carried by this node (`None` for an empty root).
    pub fn notification(&self) -> Option<&Notification<T>> {
        self.notification.as_ref()
    }

    /// True if this node carries a terminal notification.
    pub fn is_terminal(&self) -> bool {
        self.notification.as_ref().is_some_and(Notification::is_terminal)
    }

    /// Nodes with `seq > marker` that carry a notification, oldest first.
    ///
    /// The walk stops at the chain start, so a subscriber whose marker
    /// predates the last reset gets only what the current chain holds.
    pub fn since(&self, marker: u64) -> Vec<&NotificationNode<T>> {
        let mut out = Vec::new();
        let mut cur = self;
        while cur.seq > marker {
            if cur.notification.is_some() {
                out.push(cur);
            }
            match &cur.prev {
                Some(prev) => cur = prev.as_ref(),
                None => break,
            }
        }
        out.reverse();
        out
    }
}

impl<T> Drop for NotificationNode<T> {
    fn drop(&mut self) {
        // Unlink iteratively; long chains would otherwise drop recursively.
        let mut prev = self.prev.take();
        while let Some(node) = prev {
            match Arc::try_unwrap(node) {
                Ok(mut node) => prev = node.prev.take(),
                Err(_) => break,
            }
        }
    }
}

/// Shared handle to the latest node of an aggregate's log.
pub(crate) struct NotificationLog<T> {
    tx: watch::Sender<Arc<NotificationNode<T>>>,
}

impl<T> NotificationLog<T> {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(NotificationNode::root(0));
        Self { tx }
    }

    /// Appends unless the log is already terminated. Returns whether it appended.
    pub(crate) fn append(&self, notification: Notification<T>) -> bool {
        let mut pending = Some(notification);
        self.tx.send_if_modified(|latest| {
            if latest.is_terminal() {
                return false;
            }
            match pending.take() {
                Some(n) => {
                    *latest = latest.append(n);
                    true
                }
                None => false,
            }
        })
    }

    /// Starts a fresh chain holding only `notification`.
    pub(crate) fn restart_with(&self, notification: Notification<T>) -> bool {
        let mut pending = Some(notification);
        self.tx.send_if_modified(|latest| {
            if latest.is_terminal() {
                return false;
            }
            match pending.take() {
                Some(n) => {
                    *latest = NotificationNode::root_with(latest.seq + 1, n);
                    true
                }
                None => false,
            }
        })
    }

    #[cfg(test)]
    pub(crate) fn latest(&self) -> Arc<NotificationNode<T>> {
        Arc::clone(&self.tx.borrow())
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.tx.borrow().is_terminal()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<NotificationNode<T>>> {
        self.tx.subscribe()
    }
}
