use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use tracing::debug;

use super::topic::Topic;
use crate::transport::{DeliveryToken, Destination, Outcome};
use crate::utils::BrokerError;

/// One settle call recorded by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub token: DeliveryToken,
    pub outcome: Outcome,
}

#[derive(Debug, Default, Clone, Copy)]
struct Faults {
    connects: usize,
    publishes: usize,
    acks: usize,
}

#[derive(Debug, Default)]
struct BrokerState {
    online: bool,
    /// Bumped whenever existing connections are severed.
    generation: u64,
    topics: HashMap<String, Topic>,
    faults: Faults,
    connects: usize,
    settlements: Vec<Settlement>,
}

/// In-process broker shared by every `MemoryPublisher`/`MemorySubscriber`
/// created from it. Cloning yields another handle to the same broker.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    activity: Arc<Notify>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                online: true,
                ..Default::default()
            })),
            activity: Arc::new(Notify::new()),
        }
    }

    /// Take the broker down or bring it back. Going down severs every open
    /// connection; they stay dead after the broker comes back.
    pub fn set_online(&self, online: bool) {
        {
            let mut state = self.state.lock();
            if state.online && !online {
                state.generation += 1;
            }
            state.online = online;
        }
        debug!(online, "Memory broker availability changed");
        self.activity.notify_waiters();
    }

    /// Sever every open connection while staying available.
    pub fn drop_connections(&self) {
        self.state.lock().generation += 1;
        self.activity.notify_waiters();
    }

    /// The next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.state.lock().faults.connects = count;
    }

    pub fn fail_next_publishes(&self, count: usize) {
        self.state.lock().faults.publishes = count;
    }

    pub fn fail_next_acks(&self, count: usize) {
        self.state.lock().faults.acks = count;
    }

    /// Append a record directly, bypassing any connection. Returns its offset.
    pub fn append(&self, destination: &Destination, payload: impl Into<Vec<u8>>) -> usize {
        let offset = {
            let mut state = self.state.lock();
            topic_mut(&mut state, destination).append(payload.into())
        };
        self.activity.notify_waiters();
        offset
    }

    /// Every record ever written to `destination`.
    pub fn messages(&self, destination: &Destination) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .topics
            .get(&destination.to_string())
            .map(|topic| topic.log.clone())
            .unwrap_or_default()
    }

    /// Offset committed for `destination`.
    pub fn committed(&self, destination: &Destination) -> usize {
        self.state
            .lock()
            .topics
            .get(&destination.to_string())
            .map_or(0, |topic| topic.committed)
    }

    /// Every settle call seen, in order.
    pub fn settlements(&self) -> Vec<Settlement> {
        self.state.lock().settlements.clone()
    }

    /// Successful connects so far.
    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    pub(crate) fn connect(&self) -> Result<u64, BrokerError> {
        let mut state = self.state.lock();
        if !state.online {
            return Err(BrokerError::connect("memory", "broker unreachable"));
        }
        if state.faults.connects > 0 {
            state.faults.connects -= 1;
            return Err(BrokerError::connect("memory", "injected connect failure"));
        }
        state.connects += 1;
        Ok(state.generation)
    }

    pub(crate) fn is_live(&self, generation: u64) -> bool {
        let state = self.state.lock();
        state.online && state.generation == generation
    }

    pub(crate) fn publish(
        &self,
        generation: u64,
        destination: &Destination,
        payload: &[u8],
    ) -> Result<(), BrokerError> {
        {
            let mut state = self.state.lock();
            if !state.online || state.generation != generation {
                return Err(BrokerError::Closed);
            }
            if state.faults.publishes > 0 {
                state.faults.publishes -= 1;
                return Err(BrokerError::publish(destination, "injected publish failure"));
            }
            topic_mut(&mut state, destination).append(payload.to_vec());
        }
        self.activity.notify_waiters();
        Ok(())
    }

    /// Next record at or after `position`, if one exists.
    pub(crate) fn fetch(
        &self,
        generation: u64,
        key: &str,
        position: usize,
    ) -> Result<Option<Vec<u8>>, BrokerError> {
        let state = self.state.lock();
        if !state.online || state.generation != generation {
            return Err(BrokerError::Receive("connection lost".to_string()));
        }
        Ok(state
            .topics
            .get(key)
            .and_then(|topic| topic.get(position))
            .map(<[u8]>::to_vec))
    }

    pub(crate) fn settle(
        &self,
        generation: u64,
        token: &DeliveryToken,
        outcome: Outcome,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        if !state.online || state.generation != generation {
            return Err(BrokerError::Ack(format!("{token}: channel closed")));
        }
        if state.faults.acks > 0 {
            state.faults.acks -= 1;
            return Err(BrokerError::Ack(format!("{token}: injected ack failure")));
        }

        if let (Outcome::Ack, DeliveryToken::Offset { topic, offset, .. }) = (outcome, token) {
            let offset = usize::try_from(*offset)
                .map_err(|_| BrokerError::Ack(format!("{token}: negative offset")))?;
            state
                .topics
                .entry(topic.clone())
                .or_insert_with(|| Topic::new(topic))
                .commit(offset);
        }

        state.settlements.push(Settlement {
            token: token.clone(),
            outcome,
        });
        Ok(())
    }

    pub(crate) fn committed_offset(&self, key: &str) -> usize {
        self.state
            .lock()
            .topics
            .get(key)
            .map_or(0, |topic| topic.committed)
    }

    /// Resolves on the next publish or availability change.
    pub(crate) fn activity(&self) -> Notified<'_> {
        self.activity.notified()
    }
}

fn topic_mut<'a>(state: &'a mut BrokerState, destination: &Destination) -> &'a mut Topic {
    let key = destination.to_string();
    state
        .topics
        .entry(key.clone())
        .or_insert_with(|| Topic::new(&key))
}
