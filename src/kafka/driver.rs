//! Seams to the wire client. An embedder implements these over its Kafka
//! client of choice; the adapter only ever talks to these traits.

use std::time::Duration;

use async_trait::async_trait;

use super::options::ClientProperties;
use crate::utils::BrokerError;

/// One record returned by a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// `None` for tombstones and null values.
    pub payload: Option<Vec<u8>>,
    /// Marks the end of a partition rather than a real record.
    pub is_partition_eof: bool,
}

#[async_trait]
pub trait KafkaDriver: Send + Sync + 'static {
    type Consumer: KafkaConsumerClient;
    type Producer: KafkaProducerClient;

    async fn create_consumer(
        &self,
        properties: &ClientProperties,
    ) -> Result<Self::Consumer, BrokerError>;

    async fn create_producer(
        &self,
        properties: &ClientProperties,
    ) -> Result<Self::Producer, BrokerError>;
}

#[async_trait]
pub trait KafkaConsumerClient: Send + Sync + 'static {
    async fn subscribe(&self, topic: &str) -> Result<(), BrokerError>;

    /// `Ok(None)` when nothing arrived within `timeout`.
    async fn poll(&self, timeout: Duration) -> Result<Option<KafkaRecord>, BrokerError>;

    /// Store `offset` as the next offset to read for the partition.
    async fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<(), BrokerError>;

    async fn unsubscribe(&self) -> Result<(), BrokerError>;

    fn is_healthy(&self) -> bool {
        true
    }
}

#[async_trait]
pub trait KafkaProducerClient: Send + Sync + 'static {
    async fn produce(&self, topic: &str, key: &str, value: &[u8]) -> Result<(), BrokerError>;

    async fn flush(&self, timeout: Duration) -> Result<(), BrokerError>;

    fn is_healthy(&self) -> bool {
        true
    }
}
