//! Exchange/queue backend
//!
//! The adapter maps the capability interface onto an AMQP 0-9-1 client:
//! - a channel is a connection plus one model; opening a consuming channel
//!   declares the dead-letter pair (when configured), the primary
//!   exchange, queue and binding, then starts a manual-ack consumer
//! - acknowledging sends `basic.ack`; rejecting sends `basic.nack` without
//!   requeue, so the broker dead-letters the message
//! - deliveries are processed concurrently, and a deferred acknowledgement
//!   lives `ack_replay_ttl_secs` before it is given up
//! - a deferred publish lives one network recovery interval
//!
//! The wire client is supplied through `AmqpDriver`.

mod adapter;
mod driver;
mod options;
mod topology;

use std::sync::Arc;
use std::time::Duration;

use crate::consumer::{Consumer, ConsumerOptions, DispatchMode};
use crate::dispatch::{Request, RequestConsumer};
use crate::orchestration::{ConsumerProcessorManager, ManagerOptions, RequestHandler};
use crate::producer::{Producer, ProducerOptions};
use crate::utils::Result;

pub use adapter::{AmqpPublisher, AmqpSession, AmqpSubscriber};
pub use driver::{
    AmqpChannel, AmqpConnection, AmqpDelivery, AmqpDriver, ArgumentValue, ConnectionParams,
    QueueArguments,
};
pub use options::AmqpOptions;
pub use topology::{X_DEAD_LETTER_EXCHANGE, X_DEAD_LETTER_ROUTING_KEY, X_MESSAGE_TTL};

impl AmqpOptions {
    pub fn consumer_options(&self) -> ConsumerOptions {
        ConsumerOptions {
            policy: self.recovery_policy(),
            dispatch: DispatchMode::Concurrent,
            ack_replay_ttl: Some(Duration::from_secs(self.ack_replay_ttl_secs)),
        }
    }

    pub fn producer_options(&self) -> ProducerOptions {
        ProducerOptions {
            policy: self.recovery_policy(),
            replay_ttl: Some(self.network_recovery_interval()),
        }
    }

    /// Manager options carrying this backend's retry budget and stop
    /// timeout.
    pub fn manager_options(&self, name: impl Into<String>) -> ManagerOptions {
        ManagerOptions {
            stop_timeout: self.stop_timeout(),
            ..ManagerOptions::new(name, self.max_request_retry_count)
        }
    }
}

/// A producer publishing to the configured exchange.
pub fn producer<D: AmqpDriver>(
    driver: Arc<D>,
    options: &AmqpOptions,
) -> Result<Producer<AmqpPublisher<D>>> {
    let publisher = AmqpPublisher::new(driver, options.clone())?;
    Ok(Producer::new(publisher, options.producer_options()))
}

/// A consumer on `options.queue_name`.
pub fn consumer<D: AmqpDriver>(
    driver: Arc<D>,
    options: &AmqpOptions,
) -> Result<Consumer<AmqpSubscriber<D>>> {
    let subscriber = AmqpSubscriber::new(driver, options.clone())?;
    Ok(Consumer::new(subscriber, options.consumer_options()))
}

/// Producer and consumer bound to the configured exchange and routing
/// key; retries are published back onto the same pair.
pub fn request_consumer<T: Request, D: AmqpDriver>(
    driver: Arc<D>,
    options: &AmqpOptions,
) -> Result<RequestConsumer<T, AmqpPublisher<D>, AmqpSubscriber<D>>> {
    let producer = producer(driver.clone(), options)?;
    let consumer = consumer(driver, options)?;
    RequestConsumer::new(producer, consumer)
}

/// A request consumer driven by `handler`, retrying up to
/// `options.max_request_retry_count` times.
pub fn processor_manager<T, H, D>(
    driver: Arc<D>,
    options: &AmqpOptions,
    name: impl Into<String>,
    handler: H,
) -> Result<ConsumerProcessorManager<T, H, AmqpPublisher<D>, AmqpSubscriber<D>>>
where
    T: Request,
    H: RequestHandler<T>,
    D: AmqpDriver,
{
    let bridge = request_consumer::<T, D>(driver, options)?;
    Ok(ConsumerProcessorManager::new(
        bridge,
        handler,
        options.manager_options(name),
    ))
}

#[cfg(test)]
mod tests;
