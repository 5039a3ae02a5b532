//! Resilient producer
//!
//! `Producer` publishes through a `ConnectionLifecycle` and never surfaces
//! transient broker faults to its caller. A publish that cannot go out right
//! now (no open channel, or the publish call failed) is parked in a
//! `ReplayQueue` and sent again, oldest first, right after the next
//! successful (re)connect.
//!
//! Delivery is at-least-once: a publish that failed ambiguously may reach the
//! broker twice.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::lifecycle::{ConnectionLifecycle, ConnectionState, LifecycleHook, RecoveryPolicy};
use crate::replay::{ReplayEntry, ReplayQueue};
use crate::transport::{Destination, Publisher};
use crate::utils::Result;

/// A publish waiting for a healthy channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpublishedMessage {
    pub destination: Destination,
    pub payload: Vec<u8>,
}

/// Recovery and replay settings for a [`Producer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ProducerOptions {
    /// Reconnect and health-check timing.
    pub policy: RecoveryPolicy,
    /// How long a parked publish stays eligible for replay. `None` keeps it
    /// until it is replayed.
    pub replay_ttl: Option<Duration>,
}

/// Publishes through a self-healing connection.
///
/// A publish that finds no healthy channel is parked and replayed, in
/// order, once the connection is ready again.
pub struct Producer<P: Publisher> {
    inner: Arc<ProducerInner<P>>,
}

struct ProducerInner<P: Publisher> {
    lifecycle: Arc<ConnectionLifecycle<P>>,
    unpublished: ReplayQueue<UnpublishedMessage>,
    replay_ttl: Option<Duration>,
}

impl<P: Publisher> Producer<P> {
    /// Wraps `publisher`. Nothing connects until `start`.
    pub fn new(publisher: P, options: ProducerOptions) -> Self {
        let name = format!("producer {}", publisher.endpoint());
        let lifecycle = Arc::new(ConnectionLifecycle::new(
            name.clone(),
            Arc::new(publisher),
            options.policy,
        ));
        Self {
            inner: Arc::new(ProducerInner {
                lifecycle,
                unpublished: ReplayQueue::new(name),
                replay_ttl: options.replay_ttl,
            }),
        }
    }

    /// Connect, retrying until the broker accepts the connection or the
    /// producer is stopped. Returns whether a connection was made.
    pub async fn start(&self) -> bool {
        let hook: Arc<dyn LifecycleHook<P::Channel>> = self.inner.clone();
        self.inner.lifecycle.reconnect_loop(hook).await
    }

    /// Close the connection. Parked publishes that were not replayed yet are
    /// dropped and later publishes fail with `Error::QueueClosed`.
    pub async fn stop(&self) {
        self.inner.unpublished.close();
        self.inner.lifecycle.stop().await;

        let abandoned = self.inner.unpublished.len();
        if abandoned > 0 {
            warn!(
                lifecycle = %self.inner.lifecycle.name(),
                "{abandoned} unpublished message(s) discarded on stop"
            );
        }
    }

    /// Publish `payload`, deferring it to the replay queue on any transient
    /// fault. Fails only when the producer has been stopped.
    pub async fn publish(&self, destination: &Destination, payload: Vec<u8>) -> Result<()> {
        let lifecycle = &self.inner.lifecycle;
        let Some(channel) = lifecycle.open_channel() else {
            warn!(
                lifecycle = %lifecycle.name(),
                "Channel is not open, message to {destination} moved to replay queue"
            );
            return self.inner.defer(destination.clone(), payload);
        };

        match lifecycle
            .connector()
            .publish(&channel, destination, &payload)
            .await
        {
            Ok(()) => {
                debug!(lifecycle = %lifecycle.name(), "Published message to {destination}");
                Ok(())
            }
            Err(e) => {
                warn!(
                    lifecycle = %lifecycle.name(),
                    "Error occurred in publishing message to {destination}: {e}. Move it to queue and try later"
                );
                self.inner.defer(destination.clone(), payload)
            }
        }
    }

    /// Serialize `value` as JSON and publish it.
    pub async fn publish_json<T: Serialize + ?Sized>(
        &self,
        destination: &Destination,
        value: &T,
    ) -> Result<()> {
        let payload = codec::encode(value)?;
        self.publish(destination, payload).await
    }

    /// Number of publishes waiting for replay.
    pub fn pending(&self) -> usize {
        self.inner.unpublished.len()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.lifecycle.state()
    }

    /// Resolves true once ready, false if the producer stopped first.
    pub async fn wait_until_ready(&self) -> bool {
        self.inner.lifecycle.wait_until_ready().await
    }

    /// The connection lifecycle backing this producer.
    pub fn lifecycle(&self) -> &Arc<ConnectionLifecycle<P>> {
        &self.inner.lifecycle
    }
}

impl<P: Publisher> ProducerInner<P> {
    fn defer(&self, destination: Destination, payload: Vec<u8>) -> Result<()> {
        let entry = ReplayEntry::with_ttl(
            UnpublishedMessage {
                destination,
                payload,
            },
            self.replay_ttl,
        );
        self.unpublished.enqueue(entry).inspect_err(|e| {
            error!(lifecycle = %self.lifecycle.name(), "Unable to defer publish: {e}");
        })
    }
}

#[async_trait]
impl<P: Publisher> LifecycleHook<P::Channel> for ProducerInner<P> {
    async fn on_ready(&self, channel: Arc<P::Channel>) {
        if self.unpublished.is_empty() {
            return;
        }

        info!(
            lifecycle = %self.lifecycle.name(),
            "Replaying {} unpublished message(s)",
            self.unpublished.len()
        );

        let connector = self.lifecycle.connector().clone();
        let ready_channel = channel.clone();
        let is_ready = || !self.lifecycle.is_stopping() && connector.is_open(&ready_channel);

        let report = self
            .unpublished
            .drain(self.lifecycle.shutdown_token(), is_ready, |message| {
                let connector = connector.clone();
                let channel = channel.clone();
                async move {
                    connector
                        .publish(&channel, &message.destination, &message.payload)
                        .await
                }
            })
            .await;

        debug!(lifecycle = %self.lifecycle.name(), ?report, "Replay pass finished");
    }
}
