//! # resilient-mq
//!
//! `resilient_mq` is a resilience layer that sits between application code
//! and a message broker. It keeps one logical producer or consumer alive
//! across broker outages: channels are recreated in the background, publishes
//! and acknowledgements that could not be delivered are replayed once a new
//! channel is up, and typed requests are retried a bounded number of times.
//!
//! ## Core Modules
//!
//! - `transport`: The capability interface a broker backend implements.
//! - `lifecycle`: Connect, health-check and reconnect loop shared by both roles.
//! - `replay`: FIFO queue of deferred operations, drained after a reconnect.
//! - `producer` / `consumer`: The two resilient roles.
//! - `dispatch`: Bridges raw deliveries to typed `RetryableMessage`s.
//! - `orchestration`: Runs a `RequestHandler` over a bridge with bounded retry.
//! - `kafka` / `amqp`: Adapters for partitioned-log and exchange/queue brokers.
//! - `memory`: An in-process broker with fault injection.
//! - `codec`: Permissive JSON codec and the retry-count envelope.
//! - `config`: Loading `Settings` from files and environment variables.
//! - `utils`: Shared error types and the logging bootstrap.

pub mod amqp;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod dispatch;
pub mod kafka;
pub mod lifecycle;
pub mod memory;
pub mod orchestration;
pub mod producer;
pub mod replay;
pub mod transport;
pub mod utils;

pub use consumer::{Consumer, ConsumerOptions, DispatchMode, Inbound};
pub use dispatch::{Request, RequestConsumer, RequestDelivery, RetryableMessage};
pub use lifecycle::{ConnectionLifecycle, ConnectionState, RecoveryPolicy};
pub use orchestration::{
    ConsumerProcessorManager, ExhaustedPolicy, HandlerError, ManagerOptions, RequestHandler,
};
pub use producer::{Producer, ProducerOptions};
pub use utils::{Error, Result};

#[cfg(test)]
mod tests;
