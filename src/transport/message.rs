//! Value types exchanged between the engine and broker backends.
//!
//! Notes on fields:
//! - `Destination`: where a publish goes. The log broker addresses topics,
//!   AMQP addresses an exchange plus routing key.
//! - `DeliveryToken`: opaque handle used to acknowledge one delivery. The log
//!   broker identifies records by topic/partition/offset, AMQP by a
//!   channel-scoped delivery tag.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    Topic(String),
    Exchange { exchange: String, routing_key: String },
}

impl Destination {
    pub fn topic(name: impl Into<String>) -> Self {
        Self::Topic(name.into())
    }

    pub fn exchange(exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self::Exchange {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Topic(name) => write!(f, "{name}"),
            Self::Exchange {
                exchange,
                routing_key,
            } => write!(f, "{exchange}/{routing_key}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeliveryToken {
    Offset {
        topic: String,
        partition: i32,
        offset: i64,
    },
    Tag(u64),
}

impl fmt::Display for DeliveryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offset {
                topic,
                partition,
                offset,
            } => write!(f, "{topic}[{partition}]@{offset}"),
            Self::Tag(tag) => write!(f, "tag {tag}"),
        }
    }
}

/// A message handed out by `Subscriber::receive`.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub token: DeliveryToken,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum Received {
    Delivery(Delivery),
    /// End of a partition/stream was reached. Never forwarded downstream.
    EndOfStream,
    /// The receive call returned without data.
    Idle,
}

/// How a delivery is settled with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ack,
    /// Negative acknowledgement without requeue.
    Reject,
}

impl Outcome {
    pub fn from_accepted(accepted: bool) -> Self {
        if accepted { Self::Ack } else { Self::Reject }
    }
}
