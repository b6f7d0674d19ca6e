// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Event sink and subscriber pattern implementation.
//!
//! A sink drains a broadcast receiver (usually [`SystemRef::subscribe`](crate::SystemRef::subscribe))
//! and hands every event to a [`Subscriber`]. Sinks run in their own task, so a slow subscriber
//! never slows the actors down: it only lags, and lagged events are skipped.

use crate::Event;

use async_trait::async_trait;
use tokio::{
    select,
    sync::broadcast::{Receiver as EventReceiver, error::RecvError},
};
use tokio_util::sync::CancellationToken;

use tracing::{debug, warn};

/// A sink that receives events and notifies a subscriber.
///
/// # Type Parameters
///
/// * `E` - The event type that this sink will process.
///
pub struct Sink<E: Event> {
    /// The subscriber that will be notified of events.
    subscriber: Box<dyn Subscriber<E>>,
    /// The broadcast receiver of the events.
    event_receiver: EventReceiver<E>,
}

impl<E: Event> Sink<E> {
    /// Creates a new Sink with the given event receiver and subscriber.
    pub fn new(
        event_receiver: EventReceiver<E>,
        subscriber: impl Subscriber<E>,
    ) -> Self {
        Sink {
            subscriber: Box::new(subscriber),
            event_receiver,
        }
    }

    /// Runs the sink's event processing loop until the channel is closed or `token` is
    /// cancelled. Returns the number of events delivered to the subscriber.
    pub async fn run(mut self, token: CancellationToken) -> usize {
        let mut delivered = 0;
        loop {
            let event = select! {
                _ = token.cancelled() => break,
                event = self.event_receiver.recv() => event,
            };
            match event {
                Ok(event) => {
                    debug!(
                        "Received event: {:?}. Notify to the subscriber.",
                        event
                    );
                    self.subscriber.notify(event).await;
                    delivered += 1;
                }
                Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Sink lagged behind, {} events skipped.", skipped);
                }
            }
        }
        delivered
    }
}

/// Trait for types that can receive and process events.
/// Implement this trait to define custom event processing logic
/// that will be invoked by a Sink for each event received.
///
/// # Type Parameters
///
/// * `E` - The event type this subscriber can process.
///
#[async_trait]
pub trait Subscriber<E: Event>: Send + Sync + 'static {
    /// Called when an event is received by the sink.
    async fn notify(&self, event: E);
}
