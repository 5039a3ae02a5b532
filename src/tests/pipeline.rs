//! End-to-end runs of the full pipeline against the in-process broker.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::consumer::{Consumer, ConsumerOptions, DispatchMode};
use crate::dispatch::{RequestConsumer, RetryableMessage};
use crate::lifecycle::RecoveryPolicy;
use crate::memory::{MemoryBroker, MemoryPublisher, MemorySubscriber};
use crate::orchestration::{
    ConsumerProcessorManager, ExhaustedPolicy, HandlerError, ManagerOptions, RequestHandler,
};
use crate::producer::{Producer, ProducerOptions};
use crate::transport::{Destination, Outcome};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Invoice {
    id: u32,
}

/// Fails every attempt whose retry count is below `fail_below`.
struct FlakyHandler {
    fail_below: u32,
    attempts: Mutex<Vec<(u32, u32)>>,
}

impl FlakyHandler {
    fn new(fail_below: u32) -> Self {
        Self {
            fail_below,
            attempts: Mutex::new(Vec::new()),
        }
    }

    fn attempts(&self) -> Vec<(u32, u32)> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl RequestHandler<Invoice> for FlakyHandler {
    async fn handle(&self, message: &RetryableMessage<Invoice>) -> Result<(), HandlerError> {
        self.attempts
            .lock()
            .push((message.request().id, message.retry_count()));
        if message.retry_count() < self.fail_below {
            return Err(HandlerError::retryable("ledger unavailable"));
        }
        Ok(())
    }
}

type Pipeline =
    ConsumerProcessorManager<Invoice, FlakyHandler, MemoryPublisher, MemorySubscriber>;

fn invoices() -> Destination {
    Destination::topic("invoices")
}

fn pipeline(
    broker: &MemoryBroker,
    dispatch: DispatchMode,
    handler: FlakyHandler,
    options: ManagerOptions,
) -> Pipeline {
    let policy = RecoveryPolicy::new(Duration::from_millis(20), Duration::from_millis(10));
    let producer = Producer::new(
        broker.publisher(),
        ProducerOptions {
            policy,
            replay_ttl: None,
        },
    );
    let consumer = Consumer::new(
        broker
            .subscriber(invoices())
            .poll_timeout(Duration::from_millis(10)),
        ConsumerOptions {
            policy,
            dispatch,
            ack_replay_ttl: None,
        },
    );
    let bridge = RequestConsumer::new(producer, consumer).unwrap();
    ConsumerProcessorManager::new(bridge, handler, options)
}

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(3), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

#[tokio::test]
async fn pipeline_converges_once_the_broker_comes_back() {
    let broker = MemoryBroker::new();
    broker.set_online(false);
    for id in 0..3 {
        broker.append(&invoices(), format!(r#"{{"id": {id}}}"#));
    }

    let pipeline = pipeline(
        &broker,
        DispatchMode::Inline,
        FlakyHandler::new(0),
        ManagerOptions::new("invoices", 1),
    );
    pipeline.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(broker.connects(), 0);

    broker.set_online(true);
    eventually("all invoices committed", || broker.committed(&invoices()) == 3).await;

    let ids: Vec<u32> = pipeline.handler().attempts().iter().map(|a| a.0).collect();
    assert_eq!(ids, vec![0, 1, 2]);
    assert_eq!(
        pipeline
            .bridge()
            .consumer()
            .lifecycle()
            .health_loops_started(),
        1
    );

    pipeline.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn retry_that_failed_to_publish_is_replayed_and_handled_once() {
    let broker = MemoryBroker::new();
    let pipeline = pipeline(
        &broker,
        DispatchMode::Concurrent,
        FlakyHandler::new(1),
        ManagerOptions::new("invoices", 3),
    );
    pipeline.start().await.unwrap();
    assert!(pipeline.bridge().producer().wait_until_ready().await);
    assert!(pipeline.bridge().consumer().wait_until_ready().await);

    broker.fail_next_publishes(1);
    broker.append(&invoices(), r#"{"id": 7}"#);

    // the retry is parked and the original delivery acknowledged
    eventually("original delivery acknowledged", || broker.committed(&invoices()) == 1).await;
    assert_eq!(pipeline.bridge().producer().pending(), 1);
    assert_eq!(broker.messages(&invoices()).len(), 1);

    broker.drop_connections();

    eventually("retry handled", || pipeline.handler().attempts().len() == 2).await;
    eventually("retry acknowledged", || broker.committed(&invoices()) == 2).await;

    assert_eq!(pipeline.handler().attempts(), vec![(7, 0), (7, 1)]);
    assert_eq!(broker.messages(&invoices()).len(), 2);
    assert_eq!(pipeline.bridge().producer().pending(), 0);

    pipeline.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn retries_are_bounded_and_the_last_attempt_is_rejected() {
    let broker = MemoryBroker::new();
    broker.append(&invoices(), r#"{"id": 3}"#);

    let options = ManagerOptions {
        exhausted: ExhaustedPolicy::Reject,
        ..ManagerOptions::new("invoices", 2)
    };
    let pipeline = pipeline(&broker, DispatchMode::Inline, FlakyHandler::new(u32::MAX), options);
    pipeline.start().await.unwrap();

    eventually("three settlements", || broker.settlements().len() == 3).await;

    assert_eq!(pipeline.handler().attempts(), vec![(3, 0), (3, 1), (3, 2)]);
    let outcomes: Vec<Outcome> = broker.settlements().iter().map(|s| s.outcome).collect();
    assert_eq!(outcomes, vec![Outcome::Ack, Outcome::Ack, Outcome::Reject]);
    assert_eq!(broker.messages(&invoices()).len(), 3);

    pipeline.stop(Duration::from_secs(1)).await;
    assert_eq!(pipeline.handler().attempts().len(), 3);
}

#[tokio::test]
async fn stop_during_an_outage_is_bounded_and_idempotent() {
    let broker = MemoryBroker::new();
    broker.set_online(false);

    let pipeline = pipeline(
        &broker,
        DispatchMode::Concurrent,
        FlakyHandler::new(0),
        ManagerOptions::new("invoices", 1),
    );
    pipeline.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let started = Instant::now();
    pipeline.stop(Duration::from_millis(200)).await;
    pipeline.stop(Duration::from_millis(200)).await;
    assert!(started.elapsed() < Duration::from_secs(2));

    broker.set_online(true);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.connects(), 0);
    assert!(pipeline.handler().attempts().is_empty());
}
