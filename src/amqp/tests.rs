use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serial_test::serial;

use super::*;
use crate::consumer::DispatchMode;
use crate::transport::{Connector, DeliveryToken, Destination, Outcome, Publisher, Received, Subscriber};
use crate::utils::{BrokerError, ConfigError, Error};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Exchange(String),
    Queue(String, QueueArguments),
    Bind(String, String, String),
    Qos(u16),
    Consume(String, String),
    Ack(u64),
    Nack(u64, bool),
    Publish(String, String, Vec<u8>),
}

#[derive(Default)]
struct FakeServer {
    calls: Mutex<Vec<Call>>,
    deliveries: Mutex<VecDeque<AmqpDelivery>>,
    fail_exchange: Mutex<Option<String>>,
    params: Mutex<Vec<ConnectionParams>>,
    connections_closed: Mutex<usize>,
    channel_open: AtomicBool,
}

impl FakeServer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            channel_open: AtomicBool::new(true),
            ..Default::default()
        })
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn push(&self, tag: u64, body: &str) {
        self.deliveries.lock().push_back(AmqpDelivery {
            delivery_tag: tag,
            body: body.as_bytes().to_vec(),
        });
    }
}

struct FakeDriver {
    server: Arc<FakeServer>,
}

struct FakeConnection {
    server: Arc<FakeServer>,
}

struct FakeChannel {
    server: Arc<FakeServer>,
}

#[async_trait]
impl AmqpDriver for FakeDriver {
    type Connection = FakeConnection;

    async fn connect(&self, params: &ConnectionParams) -> Result<FakeConnection, BrokerError> {
        self.server.params.lock().push(params.clone());
        Ok(FakeConnection {
            server: self.server.clone(),
        })
    }
}

#[async_trait]
impl AmqpConnection for FakeConnection {
    type Channel = FakeChannel;

    async fn create_channel(&self) -> Result<FakeChannel, BrokerError> {
        Ok(FakeChannel {
            server: self.server.clone(),
        })
    }

    fn is_open(&self) -> bool {
        true
    }

    async fn close(&self) -> Result<(), BrokerError> {
        *self.server.connections_closed.lock() += 1;
        Ok(())
    }
}

#[async_trait]
impl AmqpChannel for FakeChannel {
    async fn exchange_declare(
        &self,
        exchange: &str,
        _kind: &str,
        _durable: bool,
    ) -> Result<(), BrokerError> {
        if self.server.fail_exchange.lock().as_deref() == Some(exchange) {
            return Err(BrokerError::Topology(format!("{exchange} refused")));
        }
        self.server
            .calls
            .lock()
            .push(Call::Exchange(exchange.to_string()));
        Ok(())
    }

    async fn queue_declare(
        &self,
        queue: &str,
        _durable: bool,
        arguments: &QueueArguments,
    ) -> Result<(), BrokerError> {
        self.server
            .calls
            .lock()
            .push(Call::Queue(queue.to_string(), arguments.clone()));
        Ok(())
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.server.calls.lock().push(Call::Bind(
            queue.to_string(),
            exchange.to_string(),
            routing_key.to_string(),
        ));
        Ok(())
    }

    async fn basic_qos(&self, prefetch_count: u16) -> Result<(), BrokerError> {
        self.server.calls.lock().push(Call::Qos(prefetch_count));
        Ok(())
    }

    async fn basic_consume(&self, queue: &str, consumer_tag: &str) -> Result<(), BrokerError> {
        self.server
            .calls
            .lock()
            .push(Call::Consume(queue.to_string(), consumer_tag.to_string()));
        Ok(())
    }

    async fn next_delivery(&self, timeout: Duration) -> Result<Option<AmqpDelivery>, BrokerError> {
        let next = self.server.deliveries.lock().pop_front();
        if next.is_none() {
            tokio::time::sleep(timeout.min(Duration::from_millis(5))).await;
        }
        Ok(next)
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.server.calls.lock().push(Call::Ack(delivery_tag));
        Ok(())
    }

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.server
            .calls
            .lock()
            .push(Call::Nack(delivery_tag, requeue));
        Ok(())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> Result<(), BrokerError> {
        self.server.calls.lock().push(Call::Publish(
            exchange.to_string(),
            routing_key.to_string(),
            body.to_vec(),
        ));
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.server.channel_open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

fn options() -> AmqpOptions {
    AmqpOptions {
        host_name: "rabbit-1".to_string(),
        exchange: "orders".to_string(),
        routing_key: "created".to_string(),
        queue_name: "orders.created".to_string(),
        consumer_tag: Some("worker-1".to_string()),
        network_recovery_interval_secs: 1,
        retry_create_delay_ms: 10,
        poll_timeout_ms: 10,
        ..Default::default()
    }
}

fn with_dead_letter(mut options: AmqpOptions) -> AmqpOptions {
    options.dead_letter_exchange = "orders.dlx".to_string();
    options.dead_letter_routing_key = "dead".to_string();
    options.dead_letter_queue_name = "orders.dead".to_string();
    options
}

fn driver(server: &Arc<FakeServer>) -> Arc<FakeDriver> {
    Arc::new(FakeDriver {
        server: server.clone(),
    })
}

#[test]
fn defaults_follow_the_documented_values() {
    let options = AmqpOptions::default();
    assert_eq!(options.port, 5672);
    assert_eq!(options.virtual_host, "/");
    assert_eq!(options.network_recovery_interval(), Duration::from_secs(10));
    assert_eq!(options.stop_timeout(), Duration::from_secs(30));
    assert_eq!(options.ack_replay_ttl_secs, 180);
    assert!(!options.dead_letter_configured());
}

#[test]
fn validation_names_the_missing_field() {
    let mut invalid = options();
    invalid.queue_name.clear();
    assert!(matches!(
        invalid.validate(),
        Err(ConfigError::MissingField("queue_name"))
    ));

    let mut invalid = options();
    invalid.network_recovery_interval_secs = 0;
    assert!(matches!(
        invalid.validate(),
        Err(ConfigError::Invalid {
            field: "network_recovery_interval_secs",
            ..
        })
    ));

    let server = FakeServer::new();
    let result = producer(driver(&server), &AmqpOptions::default());
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn dead_letter_needs_all_three_names() {
    let mut options = with_dead_letter(options());
    assert!(options.dead_letter_configured());
    options.dead_letter_queue_name.clear();
    assert!(!options.dead_letter_configured());
}

#[test]
fn backend_options_select_concurrent_dispatch_and_expiring_replay() {
    let options = options();
    let consumer = options.consumer_options();
    assert_eq!(consumer.dispatch, DispatchMode::Concurrent);
    assert_eq!(consumer.ack_replay_ttl, Some(Duration::from_secs(180)));
    assert_eq!(
        options.producer_options().replay_ttl,
        Some(Duration::from_secs(1))
    );
}

#[test]
fn manager_options_take_retry_budget_and_stop_timeout() {
    let mut options = options();
    options.max_request_retry_count = 4;
    options.stop_timeout_ms = 2_500;

    let manager = options.manager_options("orders");
    assert_eq!(manager.name, "orders");
    assert_eq!(manager.max_request_retry_count, 4);
    assert_eq!(manager.stop_timeout, Duration::from_millis(2_500));
}

#[test]
#[serial]
fn consumer_tag_falls_back_to_the_host_name() {
    let mut options = options();
    options.consumer_tag = None;
    temp_env::with_vars(
        [("HOSTNAME", Some("box-7")), ("COMPUTERNAME", None::<&str>)],
        || assert_eq!(options.consumer_tag(), "box-7"),
    );
    temp_env::with_vars(
        [("HOSTNAME", None::<&str>), ("COMPUTERNAME", None)],
        || assert_eq!(options.consumer_tag(), "resilient-mq"),
    );
}

#[tokio::test]
async fn open_declares_dead_letter_and_primary_topology() {
    let server = FakeServer::new();
    let mut options = with_dead_letter(options());
    options.prefetch_count = 8;
    let subscriber = AmqpSubscriber::new(driver(&server), options.clone()).unwrap();

    let session = subscriber.open().await.unwrap();
    assert!(subscriber.is_open(&session));

    let calls = server.calls();
    assert_eq!(
        calls,
        vec![
            Call::Exchange("orders.dlx".to_string()),
            Call::Queue("orders.dead".to_string(), QueueArguments::new()),
            Call::Bind(
                "orders.dead".to_string(),
                "orders.dlx".to_string(),
                "dead".to_string()
            ),
            Call::Exchange("orders".to_string()),
            Call::Queue(
                "orders.created".to_string(),
                QueueArguments::from([
                    (
                        X_DEAD_LETTER_EXCHANGE.to_string(),
                        ArgumentValue::Str("orders.dlx".to_string())
                    ),
                    (X_MESSAGE_TTL.to_string(), ArgumentValue::Int(3_600_000)),
                    (
                        X_DEAD_LETTER_ROUTING_KEY.to_string(),
                        ArgumentValue::Str("dead".to_string())
                    ),
                ])
            ),
            Call::Bind(
                "orders.created".to_string(),
                "orders".to_string(),
                "created".to_string()
            ),
            Call::Qos(8),
            Call::Consume("orders.created".to_string(), "worker-1".to_string()),
        ]
    );

    let params = server.params.lock()[0].clone();
    assert_eq!(params.host_name, "rabbit-1");
    assert_eq!(params.port, 5672);
}

#[tokio::test]
async fn dead_letter_failure_still_declares_a_plain_queue() {
    let server = FakeServer::new();
    *server.fail_exchange.lock() = Some("orders.dlx".to_string());
    let subscriber = AmqpSubscriber::new(driver(&server), with_dead_letter(options())).unwrap();

    subscriber.open().await.unwrap();

    assert!(
        server
            .calls()
            .contains(&Call::Queue("orders.created".to_string(), QueueArguments::new()))
    );
}

#[tokio::test]
async fn primary_topology_failure_fails_open_and_closes_the_connection() {
    let server = FakeServer::new();
    *server.fail_exchange.lock() = Some("orders".to_string());
    let subscriber = AmqpSubscriber::new(driver(&server), options()).unwrap();

    let result = subscriber.open().await;
    assert!(matches!(result, Err(BrokerError::Topology(_))));
    assert_eq!(*server.connections_closed.lock(), 1);
    assert!(
        !server
            .calls()
            .iter()
            .any(|call| matches!(call, Call::Consume(..)))
    );
}

#[tokio::test]
async fn receive_and_settle_map_onto_tags() {
    let server = FakeServer::new();
    let subscriber = AmqpSubscriber::new(driver(&server), options()).unwrap();
    let session = subscriber.open().await.unwrap();
    assert_eq!(subscriber.source(), Destination::exchange("orders", "created"));

    server.push(7, "hello");
    let Received::Delivery(delivery) = subscriber.receive(&session).await.unwrap() else {
        panic!("expected a delivery");
    };
    assert_eq!(delivery.token, DeliveryToken::Tag(7));
    assert_eq!(delivery.payload, b"hello");
    assert!(matches!(
        subscriber.receive(&session).await.unwrap(),
        Received::Idle
    ));

    subscriber
        .settle(&session, &DeliveryToken::Tag(7), Outcome::Ack)
        .await
        .unwrap();
    subscriber
        .settle(&session, &DeliveryToken::Tag(8), Outcome::Reject)
        .await
        .unwrap();
    let calls = server.calls();
    assert!(calls.ends_with(&[Call::Ack(7), Call::Nack(8, false)]));

    server.channel_open.store(false, Ordering::SeqCst);
    assert!(!subscriber.is_open(&session));
}

#[tokio::test]
async fn publish_fills_missing_route_from_options() {
    let server = FakeServer::new();
    let publisher = AmqpPublisher::new(driver(&server), options()).unwrap();
    let session = publisher.open().await.unwrap();

    publisher
        .publish(&session, &Destination::exchange("", ""), b"a")
        .await
        .unwrap();
    publisher
        .publish(&session, &Destination::topic("shipped"), b"b")
        .await
        .unwrap();
    publisher
        .publish(&session, &Destination::exchange("audit", "all"), b"c")
        .await
        .unwrap();

    assert_eq!(
        server.calls(),
        vec![
            Call::Publish("orders".to_string(), "created".to_string(), b"a".to_vec()),
            Call::Publish("orders".to_string(), "shipped".to_string(), b"b".to_vec()),
            Call::Publish("audit".to_string(), "all".to_string(), b"c".to_vec()),
        ]
    );
}

#[derive(Debug, Serialize, Deserialize)]
struct Order {
    id: u32,
}

#[tokio::test]
async fn request_consumer_acks_accepted_and_nacks_rejected() {
    let server = FakeServer::new();
    server.push(1, r#"{"id": 1}"#);
    server.push(2, r#"{"id": 2}"#);

    let bridge = request_consumer::<Order, _>(driver(&server), &options()).unwrap();
    assert!(bridge.start().await);

    for _ in 0..2 {
        let delivery = tokio::time::timeout(Duration::from_secs(2), bridge.recv())
            .await
            .unwrap()
            .unwrap();
        let accepted = delivery.message.request().id == 1;
        delivery.complete(accepted);
    }

    bridge.stop(Duration::from_secs(1)).await;

    let calls = server.calls();
    assert!(calls.contains(&Call::Ack(1)));
    assert!(calls.contains(&Call::Nack(2, false)));
}
