use std::marker::PhantomData;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::{
    core::{Config, RequestProcessor},
    events::Bus,
    sources::{AlwaysConnected, NetworkStatus, Params, SourceSpec},
    stash::Payload,
    subscribers::{Subscribe, SubscriberSet},
};

/// Builder for constructing a [`RequestProcessor`] with optional features.
pub struct ProcessorBuilder<P, T> {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
    network: Arc<dyn NetworkStatus>,
    _marker: PhantomData<fn(P) -> T>,
}

impl<P, T> ProcessorBuilder<P, T> {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            network: Arc::new(AlwaysConnected),
            _marker: PhantomData,
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (aggregate lifecycle, source failures,
    /// stash write failures) through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Sets the connectivity probe consulted before network-required source calls.
    pub fn with_network(mut self, network: Arc<dyn NetworkStatus>) -> Self {
        self.network = network;
        self
    }
}

impl<P: Params, T: Payload> ProcessorBuilder<P, T> {
    /// Builds the processor for `spec`.
    ///
    /// With subscribers this spawns the event listener, so it must run inside
    /// a tokio runtime. The listener stops once the last processor clone is dropped.
    pub fn build(self, spec: SourceSpec<P, T>) -> RequestProcessor<P, T> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());

        let listener = if self.subscribers.is_empty() {
            None
        } else {
            let token = CancellationToken::new();
            let subs = SubscriberSet::new(self.subscribers, bus.clone());
            subscriber_listener(&bus, subs, token.clone());
            Some(token.drop_guard())
        };

        RequestProcessor::from_parts(self.cfg, spec, self.network, bus, listener)
    }
}

/// Subscribes to the bus and forwards events to the subscriber set (fire-and-forget).
fn subscriber_listener(bus: &Bus, subs: SubscriberSet, token: CancellationToken) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                ev = rx.recv() => match ev {
                    Ok(ev) => subs.emit(ev),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        subs.shutdown().await;
    });
}
