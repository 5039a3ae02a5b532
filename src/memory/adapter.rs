use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::engine::MemoryBroker;
use crate::transport::{
    Connector, Delivery, DeliveryToken, Destination, Outcome, Publisher, Received, Subscriber,
};
use crate::utils::BrokerError;

const ENDPOINT: &str = "memory://broker";

/// Live connection to a `MemoryBroker`.
#[derive(Debug)]
pub struct MemoryChannel {
    generation: u64,
    closed: AtomicBool,
    /// Next offset this channel will read.
    position: AtomicUsize,
}

impl MemoryChannel {
    fn new(generation: u64, position: usize) -> Self {
        Self {
            generation,
            closed: AtomicBool::new(false),
            position: AtomicUsize::new(position),
        }
    }

    fn is_open(&self, broker: &MemoryBroker) -> bool {
        !self.closed.load(Ordering::SeqCst) && broker.is_live(self.generation)
    }
}

#[derive(Debug, Clone)]
pub struct MemoryPublisher {
    broker: MemoryBroker,
}

impl MemoryPublisher {
    pub fn new(broker: MemoryBroker) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl Connector for MemoryPublisher {
    type Channel = MemoryChannel;

    fn endpoint(&self) -> String {
        ENDPOINT.to_string()
    }

    async fn open(&self) -> Result<MemoryChannel, BrokerError> {
        let generation = self.broker.connect()?;
        Ok(MemoryChannel::new(generation, 0))
    }

    fn is_open(&self, channel: &MemoryChannel) -> bool {
        channel.is_open(&self.broker)
    }

    async fn close(&self, channel: &MemoryChannel) -> Result<(), BrokerError> {
        channel.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(
        &self,
        channel: &MemoryChannel,
        destination: &Destination,
        payload: &[u8],
    ) -> Result<(), BrokerError> {
        if channel.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        self.broker.publish(channel.generation, destination, payload)
    }
}

/// Reads one destination starting at its committed offset. Every new
/// channel rewinds to the committed offset, so unacknowledged records are
/// delivered again after a reconnect.
#[derive(Debug, Clone)]
pub struct MemorySubscriber {
    broker: MemoryBroker,
    source: Destination,
    poll_timeout: Duration,
}

impl MemorySubscriber {
    pub fn new(broker: MemoryBroker, source: Destination) -> Self {
        Self {
            broker,
            source,
            poll_timeout: Duration::from_millis(50),
        }
    }

    /// How long `receive` waits for a record before reporting `Idle`.
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for MemorySubscriber {
    type Channel = MemoryChannel;

    fn endpoint(&self) -> String {
        format!("{ENDPOINT}/{}", self.source)
    }

    async fn open(&self) -> Result<MemoryChannel, BrokerError> {
        let generation = self.broker.connect()?;
        let position = self.broker.committed_offset(&self.source.to_string());
        Ok(MemoryChannel::new(generation, position))
    }

    fn is_open(&self, channel: &MemoryChannel) -> bool {
        channel.is_open(&self.broker)
    }

    async fn close(&self, channel: &MemoryChannel) -> Result<(), BrokerError> {
        channel.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Subscriber for MemorySubscriber {
    fn source(&self) -> Destination {
        self.source.clone()
    }

    async fn receive(&self, channel: &MemoryChannel) -> Result<Received, BrokerError> {
        let key = self.source.to_string();
        loop {
            if channel.closed.load(Ordering::SeqCst) {
                return Err(BrokerError::Closed);
            }

            // register interest before looking so a concurrent append wakes us
            let activity = self.broker.activity();
            let position = channel.position.load(Ordering::SeqCst);

            if let Some(payload) = self.broker.fetch(channel.generation, &key, position)? {
                channel.position.store(position + 1, Ordering::SeqCst);
                return Ok(Received::Delivery(Delivery {
                    token: DeliveryToken::Offset {
                        topic: key,
                        partition: 0,
                        offset: i64::try_from(position).unwrap_or(i64::MAX),
                    },
                    payload,
                }));
            }

            tokio::select! {
                _ = activity => {}
                _ = tokio::time::sleep(self.poll_timeout) => return Ok(Received::Idle),
            }
        }
    }

    async fn settle(
        &self,
        channel: &MemoryChannel,
        token: &DeliveryToken,
        outcome: Outcome,
    ) -> Result<(), BrokerError> {
        if channel.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Ack(format!("{token}: channel closed")));
        }
        self.broker.settle(channel.generation, token, outcome)
    }
}
