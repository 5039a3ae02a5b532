//! Seams to the wire client. An embedder implements these over its AMQP
//! client of choice; the adapter only ever talks to these traits.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::utils::BrokerError;

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host_name: String,
    pub port: u16,
    pub virtual_host: String,
    pub user_name: String,
    pub password: String,
    pub use_ssl: bool,
    pub heartbeat: Duration,
}

/// Value of one queue declaration argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentValue {
    Str(String),
    Int(i64),
}

pub type QueueArguments = BTreeMap<String, ArgumentValue>;

/// A message pushed to a consumer channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmqpDelivery {
    pub delivery_tag: u64,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait AmqpDriver: Send + Sync + 'static {
    type Connection: AmqpConnection;

    async fn connect(&self, params: &ConnectionParams) -> Result<Self::Connection, BrokerError>;
}

#[async_trait]
pub trait AmqpConnection: Send + Sync + 'static {
    type Channel: AmqpChannel;

    async fn create_channel(&self) -> Result<Self::Channel, BrokerError>;

    fn is_open(&self) -> bool;

    async fn close(&self) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait AmqpChannel: Send + Sync + 'static {
    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: &str,
        durable: bool,
    ) -> Result<(), BrokerError>;

    async fn queue_declare(
        &self,
        queue: &str,
        durable: bool,
        arguments: &QueueArguments,
    ) -> Result<(), BrokerError>;

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError>;

    async fn basic_qos(&self, prefetch_count: u16) -> Result<(), BrokerError>;

    /// Start pushing deliveries from `queue` to this channel, manual ack.
    async fn basic_consume(&self, queue: &str, consumer_tag: &str) -> Result<(), BrokerError>;

    /// `Ok(None)` when nothing arrived within `timeout`.
    async fn next_delivery(&self, timeout: Duration) -> Result<Option<AmqpDelivery>, BrokerError>;

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError>;

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> Result<(), BrokerError>;

    fn is_open(&self) -> bool;

    async fn close(&self) -> Result<(), BrokerError>;
}
