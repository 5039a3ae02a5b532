use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::driver::{KafkaConsumerClient, KafkaDriver, KafkaProducerClient};
use super::options::KafkaOptions;
use crate::transport::{
    Connector, Delivery, DeliveryToken, Destination, Outcome, Publisher, Received, Subscriber,
};
use crate::utils::{BrokerError, ConfigError};

/// Consuming side of the log backend. Each channel is a freshly created
/// client subscribed to `options.topic`.
pub struct KafkaSubscriber<D: KafkaDriver> {
    driver: Arc<D>,
    options: KafkaOptions,
}

impl<D: KafkaDriver> KafkaSubscriber<D> {
    pub fn new(driver: Arc<D>, options: KafkaOptions) -> Result<Self, ConfigError> {
        options.validate_consumer()?;
        Ok(Self { driver, options })
    }

    pub fn options(&self) -> &KafkaOptions {
        &self.options
    }
}

#[async_trait]
impl<D: KafkaDriver> Connector for KafkaSubscriber<D> {
    type Channel = D::Consumer;

    fn endpoint(&self) -> String {
        format!("{}/{}", self.options.bootstrap_servers, self.options.topic)
    }

    async fn open(&self) -> Result<D::Consumer, BrokerError> {
        let client = self
            .driver
            .create_consumer(&self.options.consumer_properties())
            .await?;
        client.subscribe(&self.options.topic).await?;
        debug!("Subscribed to {}", self.options.topic);
        Ok(client)
    }

    fn is_open(&self, channel: &D::Consumer) -> bool {
        channel.is_healthy()
    }

    async fn close(&self, channel: &D::Consumer) -> Result<(), BrokerError> {
        channel.unsubscribe().await
    }
}

#[async_trait]
impl<D: KafkaDriver> Subscriber for KafkaSubscriber<D> {
    fn source(&self) -> Destination {
        Destination::topic(self.options.topic.clone())
    }

    async fn receive(&self, channel: &D::Consumer) -> Result<Received, BrokerError> {
        let Some(record) = channel.poll(self.options.poll_timeout()).await? else {
            return Ok(Received::Idle);
        };

        if record.is_partition_eof {
            debug!(
                "Reached end of {}[{}] at offset {}",
                record.topic, record.partition, record.offset
            );
            return Ok(Received::EndOfStream);
        }

        match record.payload {
            Some(payload) if !payload.is_empty() => Ok(Received::Delivery(Delivery {
                token: DeliveryToken::Offset {
                    topic: record.topic,
                    partition: record.partition,
                    offset: record.offset,
                },
                payload,
            })),
            _ => {
                error!(
                    "Message {}[{}]@{} is empty, committing it",
                    record.topic, record.partition, record.offset
                );
                if let Err(e) = channel
                    .commit(&record.topic, record.partition, record.offset + 1)
                    .await
                {
                    error!(
                        "Unable to commit empty message {}[{}]@{}: {e}",
                        record.topic, record.partition, record.offset
                    );
                }
                Ok(Received::Idle)
            }
        }
    }

    async fn settle(
        &self,
        channel: &D::Consumer,
        token: &DeliveryToken,
        outcome: Outcome,
    ) -> Result<(), BrokerError> {
        let DeliveryToken::Offset {
            topic,
            partition,
            offset,
        } = token
        else {
            return Err(BrokerError::Ack(format!("{token} is not a log offset")));
        };

        match outcome {
            Outcome::Ack => channel.commit(topic, *partition, offset + 1).await,
            // the offset stays uncommitted; the retry path owns the message now
            Outcome::Reject => Ok(()),
        }
    }
}

/// Publishing side of the log backend. Every record gets a fresh UUID key
/// and is flushed right after it is produced.
pub struct KafkaPublisher<D: KafkaDriver> {
    driver: Arc<D>,
    options: KafkaOptions,
}

impl<D: KafkaDriver> KafkaPublisher<D> {
    pub fn new(driver: Arc<D>, options: KafkaOptions) -> Result<Self, ConfigError> {
        options.validate_producer()?;
        Ok(Self { driver, options })
    }
}

#[async_trait]
impl<D: KafkaDriver> Connector for KafkaPublisher<D> {
    type Channel = D::Producer;

    fn endpoint(&self) -> String {
        self.options.bootstrap_servers.clone()
    }

    async fn open(&self) -> Result<D::Producer, BrokerError> {
        self.driver
            .create_producer(&self.options.producer_properties())
            .await
    }

    fn is_open(&self, channel: &D::Producer) -> bool {
        channel.is_healthy()
    }

    async fn close(&self, channel: &D::Producer) -> Result<(), BrokerError> {
        channel.flush(self.options.flush_timeout()).await
    }
}

#[async_trait]
impl<D: KafkaDriver> Publisher for KafkaPublisher<D> {
    async fn publish(
        &self,
        channel: &D::Producer,
        destination: &Destination,
        payload: &[u8],
    ) -> Result<(), BrokerError> {
        let Destination::Topic(topic) = destination else {
            return Err(BrokerError::publish(
                destination,
                "the log backend only publishes to topics",
            ));
        };

        let key = Uuid::new_v4().to_string();
        channel.produce(topic, &key, payload).await?;
        if let Err(e) = channel.flush(self.options.flush_timeout()).await {
            warn!("Flush after producing to {topic} failed: {e}");
            return Err(e);
        }
        Ok(())
    }
}
