//! Connectivity probe consulted before network-required sources run.

use std::sync::atomic::{AtomicBool, Ordering};

/// Answers whether the network is currently reachable.
pub trait NetworkStatus: Send + Sync + 'static {
    /// True if a network-required source may be called now.
    fn is_connected(&self) -> bool;
}

/// Probe that always reports a connection. The processor default.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysConnected;

impl NetworkStatus for AlwaysConnected {
    fn is_connected(&self) -> bool {
        true
    }
}

/// Probe backed by a flag the application flips from its connectivity callbacks.
#[derive(Debug)]
pub struct NetworkFlag {
    connected: AtomicBool,
}

impl NetworkFlag {
    /// Creates a flag with the given initial state.
    pub fn new(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
        }
    }

    /// Updates the state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }
}

impl NetworkStatus for NetworkFlag {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}
