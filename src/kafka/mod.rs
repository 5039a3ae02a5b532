//! Partitioned-log backend
//!
//! The adapter maps the capability interface onto a Kafka-style client:
//! - a channel is a consumer (or producer) client created from
//!   `KafkaOptions`; a reconnect builds a new client and resubscribes
//! - acknowledging commits `offset + 1`; rejecting leaves the offset alone
//! - partition EOF markers and empty records never reach the application
//! - deliveries are processed in line, one at a time, to keep partition
//!   order, and deferred acknowledgements never expire
//!
//! The wire client is supplied through `KafkaDriver`.

mod adapter;
mod driver;
mod options;

use std::sync::Arc;

use crate::consumer::{Consumer, ConsumerOptions, DispatchMode};
use crate::dispatch::{Request, RequestConsumer};
use crate::orchestration::{ConsumerProcessorManager, ManagerOptions, RequestHandler};
use crate::producer::{Producer, ProducerOptions};
use crate::utils::Result;

pub use adapter::{KafkaPublisher, KafkaSubscriber};
pub use driver::{KafkaConsumerClient, KafkaDriver, KafkaProducerClient, KafkaRecord};
pub use options::{ClientProperties, KafkaOptions};

impl KafkaOptions {
    pub fn consumer_options(&self) -> ConsumerOptions {
        ConsumerOptions {
            policy: self.recovery_policy(),
            dispatch: DispatchMode::Inline,
            ack_replay_ttl: None,
        }
    }

    pub fn producer_options(&self) -> ProducerOptions {
        ProducerOptions {
            policy: self.recovery_policy(),
            replay_ttl: None,
        }
    }

    /// Manager options carrying this backend's retry budget.
    pub fn manager_options(&self, name: impl Into<String>) -> ManagerOptions {
        ManagerOptions::new(name, self.max_request_retry_count)
    }
}

/// A producer publishing to the configured cluster.
pub fn producer<D: KafkaDriver>(
    driver: Arc<D>,
    options: &KafkaOptions,
) -> Result<Producer<KafkaPublisher<D>>> {
    let publisher = KafkaPublisher::new(driver, options.clone())?;
    Ok(Producer::new(publisher, options.producer_options()))
}

/// A consumer subscribed to `options.topic`.
pub fn consumer<D: KafkaDriver>(
    driver: Arc<D>,
    options: &KafkaOptions,
) -> Result<Consumer<KafkaSubscriber<D>>> {
    let subscriber = KafkaSubscriber::new(driver, options.clone())?;
    Ok(Consumer::new(subscriber, options.consumer_options()))
}

/// Producer and consumer bound to `options.topic`, bridged for typed
/// requests.
pub fn request_consumer<T: Request, D: KafkaDriver>(
    driver: Arc<D>,
    options: &KafkaOptions,
) -> Result<RequestConsumer<T, KafkaPublisher<D>, KafkaSubscriber<D>>> {
    let producer = producer(driver.clone(), options)?;
    let consumer = consumer(driver, options)?;
    RequestConsumer::new(producer, consumer)
}

/// A request consumer driven by `handler`, retrying up to
/// `options.max_request_retry_count` times.
pub fn processor_manager<T, H, D>(
    driver: Arc<D>,
    options: &KafkaOptions,
    name: impl Into<String>,
    handler: H,
) -> Result<ConsumerProcessorManager<T, H, KafkaPublisher<D>, KafkaSubscriber<D>>>
where
    T: Request,
    H: RequestHandler<T>,
    D: KafkaDriver,
{
    let bridge = request_consumer::<T, D>(driver, options)?;
    Ok(ConsumerProcessorManager::new(
        bridge,
        handler,
        options.manager_options(name),
    ))
}
