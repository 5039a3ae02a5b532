//! The `transport` module defines the narrow capability interface every
//! broker backend implements, and the value types that flow across it.
//!
//! The resilience engine (`lifecycle`, `replay`, `producer`, `consumer`) is
//! written once against these traits. The `kafka`, `amqp` and `memory`
//! modules are thin adapters that implement them.

pub mod message;

use async_trait::async_trait;

use crate::utils::BrokerError;

pub use message::{Delivery, DeliveryToken, Destination, Outcome, Received};

/// Opens and inspects one logical connection to a broker endpoint.
///
/// `Channel` is the live handle. The engine wraps it in an `Arc` and replaces
/// it wholesale on reconnect, so implementations never need interior
/// mutability to support reconnection.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Channel: Send + Sync + 'static;

    /// Human readable endpoint used in log lines.
    fn endpoint(&self) -> String;

    async fn open(&self) -> Result<Self::Channel, BrokerError>;

    fn is_open(&self, channel: &Self::Channel) -> bool;

    async fn close(&self, channel: &Self::Channel) -> Result<(), BrokerError>;
}

/// Publishing half of a backend.
#[async_trait]
pub trait Publisher: Connector {
    async fn publish(
        &self,
        channel: &Self::Channel,
        destination: &Destination,
        payload: &[u8],
    ) -> Result<(), BrokerError>;
}

/// Consuming half of a backend. `open` must leave the channel subscribed.
#[async_trait]
pub trait Subscriber: Connector {
    /// Where deliveries come from; retries are republished here.
    fn source(&self) -> Destination;

    /// Waits for the next delivery. Implementations may return `Idle` after
    /// an internal poll timeout so liveness can be observed without traffic.
    async fn receive(&self, channel: &Self::Channel) -> Result<Received, BrokerError>;

    async fn settle(
        &self,
        channel: &Self::Channel,
        token: &DeliveryToken,
        outcome: Outcome,
    ) -> Result<(), BrokerError>;
}

#[cfg(test)]
mod tests;
