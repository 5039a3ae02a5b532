use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::driver::{AmqpChannel, AmqpConnection, AmqpDriver, ConnectionParams};
use super::options::AmqpOptions;
use super::topology;
use crate::transport::{
    Connector, Delivery, DeliveryToken, Destination, Outcome, Publisher, Received, Subscriber,
};
use crate::utils::{BrokerError, ConfigError};

type ChannelOf<D> = <<D as AmqpDriver>::Connection as AmqpConnection>::Channel;

/// A connection plus the one channel the adapter uses on it.
pub struct AmqpSession<D: AmqpDriver> {
    pub connection: D::Connection,
    pub channel: ChannelOf<D>,
}

impl<D: AmqpDriver> AmqpSession<D> {
    fn is_open(&self) -> bool {
        self.connection.is_open() && self.channel.is_open()
    }

    async fn close(&self, host: &str) -> Result<(), BrokerError> {
        if let Err(e) = self.channel.close().await {
            warn!("[{host}]: Error while disposing old channel: {e}");
        }
        self.connection.close().await
    }
}

fn connection_params(options: &AmqpOptions) -> ConnectionParams {
    ConnectionParams {
        host_name: options.host_name.clone(),
        port: options.port,
        virtual_host: options.virtual_host.clone(),
        user_name: options.user_name.clone(),
        password: options.password.clone(),
        use_ssl: options.use_ssl,
        heartbeat: Duration::from_secs(u64::from(options.requested_heartbeat_secs)),
    }
}

async fn open_session<D: AmqpDriver>(
    driver: &D,
    options: &AmqpOptions,
) -> Result<AmqpSession<D>, BrokerError> {
    let connection = driver.connect(&connection_params(options)).await?;
    match connection.create_channel().await {
        Ok(channel) => Ok(AmqpSession {
            connection,
            channel,
        }),
        Err(e) => {
            if let Err(close) = connection.close().await {
                warn!("[{}]: Error closing half-open connection: {close}", options.host_name);
            }
            Err(e)
        }
    }
}

/// Consuming side of the AMQP backend. Opening a channel declares the
/// topology and starts a manual-ack consumer on `options.queue_name`.
pub struct AmqpSubscriber<D: AmqpDriver> {
    driver: Arc<D>,
    options: AmqpOptions,
}

impl<D: AmqpDriver> AmqpSubscriber<D> {
    pub fn new(driver: Arc<D>, options: AmqpOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        Ok(Self { driver, options })
    }

    pub fn options(&self) -> &AmqpOptions {
        &self.options
    }

    async fn prepare(&self, session: &AmqpSession<D>) -> Result<(), BrokerError> {
        topology::declare(&session.channel, &self.options).await?;
        if self.options.prefetch_count > 0 {
            session.channel.basic_qos(self.options.prefetch_count).await?;
        }
        session
            .channel
            .basic_consume(&self.options.queue_name, &self.options.consumer_tag())
            .await
    }
}

#[async_trait]
impl<D: AmqpDriver> Connector for AmqpSubscriber<D> {
    type Channel = AmqpSession<D>;

    fn endpoint(&self) -> String {
        format!(
            "{}:{}{}",
            self.options.host_name, self.options.port, self.options.virtual_host
        )
    }

    async fn open(&self) -> Result<AmqpSession<D>, BrokerError> {
        let host = &self.options.host_name;
        info!("[{host}]: RabbitMQ consumer create channel - Start");

        let session = open_session(self.driver.as_ref(), &self.options).await?;
        if let Err(e) = self.prepare(&session).await {
            if let Err(close) = session.close(host).await {
                warn!("[{host}]: Error closing connection after failed setup: {close}");
            }
            return Err(e);
        }

        info!("[{host}]: RabbitMQ consumer create channel - Finished");
        Ok(session)
    }

    fn is_open(&self, channel: &AmqpSession<D>) -> bool {
        channel.is_open()
    }

    async fn close(&self, channel: &AmqpSession<D>) -> Result<(), BrokerError> {
        channel.close(&self.options.host_name).await
    }
}

#[async_trait]
impl<D: AmqpDriver> Subscriber for AmqpSubscriber<D> {
    fn source(&self) -> Destination {
        Destination::exchange(self.options.exchange.clone(), self.options.routing_key.clone())
    }

    async fn receive(&self, channel: &AmqpSession<D>) -> Result<Received, BrokerError> {
        match channel
            .channel
            .next_delivery(self.options.poll_timeout())
            .await?
        {
            Some(delivery) => Ok(Received::Delivery(Delivery {
                token: DeliveryToken::Tag(delivery.delivery_tag),
                payload: delivery.body,
            })),
            None => Ok(Received::Idle),
        }
    }

    async fn settle(
        &self,
        channel: &AmqpSession<D>,
        token: &DeliveryToken,
        outcome: Outcome,
    ) -> Result<(), BrokerError> {
        let DeliveryToken::Tag(tag) = token else {
            return Err(BrokerError::Ack(format!("{token} is not a delivery tag")));
        };

        match outcome {
            Outcome::Ack => channel.channel.basic_ack(*tag).await,
            Outcome::Reject => channel.channel.basic_nack(*tag, false).await,
        }
    }
}

/// Publishing side of the AMQP backend. Empty exchange or routing key
/// fall back to the configured ones; a topic destination is published as a
/// routing key on the configured exchange.
pub struct AmqpPublisher<D: AmqpDriver> {
    driver: Arc<D>,
    options: AmqpOptions,
}

impl<D: AmqpDriver> AmqpPublisher<D> {
    pub fn new(driver: Arc<D>, options: AmqpOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        Ok(Self { driver, options })
    }

    fn route<'a>(&'a self, destination: &'a Destination) -> (&'a str, &'a str) {
        let (exchange, routing_key) = match destination {
            Destination::Exchange {
                exchange,
                routing_key,
            } => (exchange.as_str(), routing_key.as_str()),
            Destination::Topic(routing_key) => ("", routing_key.as_str()),
        };
        let exchange = if exchange.is_empty() {
            self.options.exchange.as_str()
        } else {
            exchange
        };
        let routing_key = if routing_key.is_empty() {
            self.options.routing_key.as_str()
        } else {
            routing_key
        };
        (exchange, routing_key)
    }
}

#[async_trait]
impl<D: AmqpDriver> Connector for AmqpPublisher<D> {
    type Channel = AmqpSession<D>;

    fn endpoint(&self) -> String {
        format!(
            "{}:{}{}",
            self.options.host_name, self.options.port, self.options.virtual_host
        )
    }

    async fn open(&self) -> Result<AmqpSession<D>, BrokerError> {
        open_session(self.driver.as_ref(), &self.options).await
    }

    fn is_open(&self, channel: &AmqpSession<D>) -> bool {
        channel.is_open()
    }

    async fn close(&self, channel: &AmqpSession<D>) -> Result<(), BrokerError> {
        channel.close(&self.options.host_name).await
    }
}

#[async_trait]
impl<D: AmqpDriver> Publisher for AmqpPublisher<D> {
    async fn publish(
        &self,
        channel: &AmqpSession<D>,
        destination: &Destination,
        payload: &[u8],
    ) -> Result<(), BrokerError> {
        let (exchange, routing_key) = self.route(destination);
        channel
            .channel
            .basic_publish(exchange, routing_key, payload)
            .await
    }
}
