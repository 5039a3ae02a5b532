//! Request bridge
//!
//! `RequestConsumer` pairs one `Producer` with one `Consumer` bound to the
//! same source and turns raw deliveries into typed, retry-aware requests:
//! - `recv` decodes each delivery's JSON envelope into a `RetryableMessage`.
//!   Payloads that do not decode are rejected on the spot and never handed
//!   out.
//! - `retry` encodes a message with its current retry count and publishes it
//!   back to the source, so the request re-enters the stream from the tail.

mod message;

use std::marker::PhantomData;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec;
use crate::consumer::{Acknowledger, Consumer, Inbound};
use crate::producer::Producer;
use crate::transport::{Destination, Publisher, Subscriber};
use crate::utils::{Error, Result};

pub use message::RetryableMessage;

/// Payload types the bridge can carry.
pub trait Request: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Request for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// A decoded request and the acknowledger for the delivery it came from.
#[derive(Debug)]
pub struct RequestDelivery<T> {
    pub message: RetryableMessage<T>,
    pub ack: Acknowledger,
}

impl<T> RequestDelivery<T> {
    /// Settle the delivery: ack when `accepted`, reject otherwise.
    pub fn complete(self, accepted: bool) {
        self.ack.complete(accepted);
    }
}

/// Typed request bridge over a consumer and a producer sharing one source.
/// Retries are republished to that source with the count bumped.
pub struct RequestConsumer<T, P: Publisher, S: Subscriber> {
    producer: Producer<P>,
    consumer: Consumer<S>,
    source: Destination,
    inbound: Mutex<UnboundedReceiver<Inbound>>,
    intake_closed: CancellationToken,
    _request: PhantomData<fn() -> T>,
}

impl<T: Request, P: Publisher, S: Subscriber> RequestConsumer<T, P, S> {
    /// Fails with `Error::AlreadySubscribed` when the consumer's inbound
    /// stream was already taken.
    pub fn new(producer: Producer<P>, consumer: Consumer<S>) -> Result<Self> {
        let inbound = consumer.take_inbound().ok_or(Error::AlreadySubscribed)?;
        let source = consumer.source();
        Ok(Self {
            producer,
            consumer,
            source,
            inbound: Mutex::new(inbound),
            intake_closed: CancellationToken::new(),
            _request: PhantomData,
        })
    }

    /// Start the producer, then the consumer. Each retries until connected
    /// or stopped.
    pub async fn start(&self) -> bool {
        info!(source = %self.source, "Starting request consumer");
        self.producer.start().await && self.consumer.start().await
    }

    /// Stop taking deliveries, let in-flight ones settle within `timeout`,
    /// then stop the consumer and the producer. Idempotent.
    pub async fn stop(&self, timeout: Duration) {
        self.close_intake().await;
        self.consumer.stop(timeout).await;
        self.producer.stop().await;
    }

    /// Next decoded request, or `None` once the bridge is stopping.
    pub async fn recv(&self) -> Option<RequestDelivery<T>> {
        let mut inbound = tokio::select! {
            biased;
            _ = self.intake_closed.cancelled() => return None,
            inbound = self.inbound.lock() => inbound,
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = self.intake_closed.cancelled() => return None,
                next = inbound.recv() => next?,
            };

            match codec::decode_request::<T>(next.payload()) {
                Ok((request, retry_count)) => {
                    let message = RetryableMessage::received(
                        request,
                        retry_count,
                        next.delivery.token,
                        next.delivery.payload,
                    );
                    return Some(RequestDelivery {
                        message,
                        ack: next.ack,
                    });
                }
                Err(e) => {
                    warn!(
                        source = %self.source,
                        "Dropping {} that could not be decoded: {e}",
                        next.delivery.token
                    );
                    next.ack.reject();
                }
            }
        }
    }

    /// Publish `message` back to the source with its current retry count.
    pub async fn retry(&self, message: &RetryableMessage<T>) -> Result<()> {
        let payload = codec::encode_request(message.request(), message.retry_count())?;
        debug!(
            source = %self.source,
            retry_count = message.retry_count(),
            "Requeueing request"
        );
        self.producer.publish(&self.source, payload).await
    }

    /// Destination consumed from and retried onto.
    pub fn source(&self) -> &Destination {
        &self.source
    }

    pub fn producer(&self) -> &Producer<P> {
        &self.producer
    }

    pub fn consumer(&self) -> &Consumer<S> {
        &self.consumer
    }

    /// Refuse further deliveries and abandon the ones not handed out yet, so
    /// the broker redelivers them later.
    async fn close_intake(&self) {
        if self.intake_closed.is_cancelled() {
            return;
        }
        self.intake_closed.cancel();

        let mut inbound = self.inbound.lock().await;
        inbound.close();
        let mut abandoned = 0usize;
        while let Ok(pending) = inbound.try_recv() {
            drop(pending);
            abandoned += 1;
        }
        if abandoned > 0 {
            info!(source = %self.source, "{abandoned} buffered delivery(ies) left for redelivery");
        }
    }
}
