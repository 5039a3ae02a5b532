//! Resilient consumer
//!
//! `Consumer` receives deliveries through a `ConnectionLifecycle`, hands each
//! one downstream as an `Inbound` together with a one-shot reply, and settles
//! the delivery with the broker once the reply arrives.
//!
//! Concurrency and usage notes:
//! - Exactly one receive loop runs per installed channel. A reconnect
//!   cancels the previous loop before the next one starts.
//! - `DispatchMode::Inline` awaits each reply before receiving again, which
//!   keeps per-partition ordering on log brokers. `DispatchMode::Concurrent`
//!   processes every delivery in its own task.
//! - A settle call that fails is parked in the ack replay queue and applied
//!   on the next channel. A reply that is dropped without an answer leaves
//!   the delivery unsettled so the broker hands it out again.
//! - The consumer counts as subscribed once a receive loop runs on the
//!   current channel and as unhealthy after that loop hits a receive error.
//!   The health check uses this to reconnect even while the connection
//!   itself still looks open.

mod inbound;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::lifecycle::{ConnectionLifecycle, ConnectionState, LifecycleHook, RecoveryPolicy};
use crate::replay::{ReplayEntry, ReplayQueue};
use crate::transport::{Delivery, DeliveryToken, Destination, Outcome, Received, Subscriber};
use crate::utils::BrokerError;

pub use inbound::{Acknowledger, Inbound};

/// How deliveries are handed to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Await the reply for each delivery before receiving the next.
    #[default]
    Inline,
    /// Process each delivery in its own task.
    Concurrent,
}

/// Recovery, dispatch and ack replay settings for a [`Consumer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsumerOptions {
    /// Reconnect and health-check timing.
    pub policy: RecoveryPolicy,
    pub dispatch: DispatchMode,
    /// How long a failed settle stays eligible for replay. `None` keeps it
    /// until it is replayed.
    pub ack_replay_ttl: Option<Duration>,
}

/// A settle call waiting for a healthy channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnackedDelivery {
    pub token: DeliveryToken,
    pub outcome: Outcome,
}

/// Receives from a self-healing subscription and hands each delivery out
/// as an [`Inbound`]. Settle calls that fail are replayed after reconnect.
pub struct Consumer<S: Subscriber> {
    inner: Arc<ConsumerInner<S>>,
}

struct ConsumerInner<S: Subscriber> {
    me: Weak<Self>,
    lifecycle: Arc<ConnectionLifecycle<S>>,
    options: ConsumerOptions,
    unacked: ReplayQueue<UnackedDelivery>,
    subscribed: AtomicBool,
    outbox: UnboundedSender<Inbound>,
    inbound: Mutex<Option<UnboundedReceiver<Inbound>>>,
    receive_loop: Mutex<Option<CancellationToken>>,
    in_flight: TaskTracker,
}

impl<S: Subscriber> Consumer<S> {
    pub fn new(subscriber: S, options: ConsumerOptions) -> Self {
        let name = format!("consumer {}", subscriber.endpoint());
        let lifecycle = Arc::new(ConnectionLifecycle::new(
            name.clone(),
            Arc::new(subscriber),
            options.policy,
        ));
        let (outbox, inbound) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new_cyclic(|me| ConsumerInner {
                me: me.clone(),
                lifecycle,
                options,
                unacked: ReplayQueue::new(name),
                subscribed: AtomicBool::new(false),
                outbox,
                inbound: Mutex::new(Some(inbound)),
                receive_loop: Mutex::new(None),
                in_flight: TaskTracker::new(),
            }),
        }
    }

    /// The stream of deliveries. Can be taken once.
    pub fn take_inbound(&self) -> Option<UnboundedReceiver<Inbound>> {
        self.inner.inbound.lock().take()
    }

    /// Connect and start receiving, retrying until connected or stopped.
    pub async fn start(&self) -> bool {
        let hook: Arc<dyn LifecycleHook<S::Channel>> = self.inner.clone();
        self.inner.lifecycle.reconnect_loop(hook).await
    }

    /// Stop receiving, give in-flight deliveries up to `timeout` to settle,
    /// then close the connection. Idempotent.
    pub async fn stop(&self, timeout: Duration) {
        let inner = &self.inner;
        if !inner.lifecycle.begin_stop() {
            inner.lifecycle.stop().await;
            return;
        }
        info!(lifecycle = %inner.lifecycle.name(), "Stopping consumer");

        inner.in_flight.close();
        if tokio::time::timeout(timeout, inner.in_flight.wait())
            .await
            .is_err()
        {
            warn!(
                lifecycle = %inner.lifecycle.name(),
                "{} delivery task(s) still running after {timeout:?}",
                inner.in_flight.len()
            );
        }

        inner.lifecycle.stop().await;

        let unsettled = inner.unacked.len();
        if unsettled > 0 {
            warn!(
                lifecycle = %inner.lifecycle.name(),
                "{unsettled} acknowledgement(s) were never applied"
            );
        }
    }

    /// Whether a receive loop is running on a healthy channel.
    pub fn is_subscribed(&self) -> bool {
        self.inner.subscribed.load(Ordering::SeqCst)
    }

    /// Settle calls waiting for replay.
    pub fn pending_acks(&self) -> usize {
        self.inner.unacked.len()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.lifecycle.state()
    }

    pub async fn wait_until_ready(&self) -> bool {
        self.inner.lifecycle.wait_until_ready().await
    }

    /// The connection lifecycle backing this consumer.
    pub fn lifecycle(&self) -> &Arc<ConnectionLifecycle<S>> {
        &self.inner.lifecycle
    }

    /// Where this consumer receives from.
    pub fn source(&self) -> Destination {
        self.inner.lifecycle.connector().source()
    }
}

impl<S: Subscriber> ConsumerInner<S> {
    async fn run_receive_loop(
        self: Arc<Self>,
        channel: Arc<S::Channel>,
        cancel: CancellationToken,
    ) {
        let subscriber = self.lifecycle.connector().clone();
        info!(lifecycle = %self.lifecycle.name(), "Receive loop started");

        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = subscriber.receive(&channel) => received,
            };

            match received {
                Ok(Received::Delivery(delivery)) => {
                    match self.options.dispatch {
                        DispatchMode::Inline => self.process(&channel, delivery).await,
                        DispatchMode::Concurrent => {
                            let inner = self.clone();
                            let channel = channel.clone();
                            self.in_flight
                                .spawn(async move { inner.process(&channel, delivery).await });
                        }
                    }
                }
                Ok(Received::EndOfStream) => {
                    debug!(lifecycle = %self.lifecycle.name(), "Reached end of stream");
                }
                Ok(Received::Idle) => {}
                Err(e) => {
                    // a loop cancelled by a reconnect must not mark the new channel unhealthy
                    if !cancel.is_cancelled() {
                        self.subscribed.store(false, Ordering::SeqCst);
                    }
                    error!(lifecycle = %self.lifecycle.name(), "Receive failed: {e}");
                    break;
                }
            }
        }

        info!(lifecycle = %self.lifecycle.name(), "Receive loop stopped");
    }

    async fn process(&self, channel: &Arc<S::Channel>, delivery: Delivery) {
        let token = delivery.token.clone();
        let (reply, answer) = oneshot::channel();

        if self.outbox.send(Inbound::new(delivery, reply)).is_err() {
            warn!(
                lifecycle = %self.lifecycle.name(),
                "Nobody is listening for {token}, leaving it unacknowledged"
            );
            return;
        }

        match answer.await {
            Ok(accepted) => self.settle(channel, token, Outcome::from_accepted(accepted)).await,
            Err(_) => {
                debug!(
                    lifecycle = %self.lifecycle.name(),
                    "{token} was abandoned, leaving it unacknowledged"
                );
            }
        }
    }

    async fn settle(&self, channel: &Arc<S::Channel>, token: DeliveryToken, outcome: Outcome) {
        let subscriber = self.lifecycle.connector();
        if outcome == Outcome::Reject {
            warn!(lifecycle = %self.lifecycle.name(), "Message receive failure: {token}");
        }

        let result = if subscriber.is_open(channel) {
            subscriber.settle(channel, &token, outcome).await
        } else {
            Err(BrokerError::Closed)
        };

        if let Err(e) = result {
            warn!(
                lifecycle = %self.lifecycle.name(),
                "Error occurred in acknowledging {token}: {e}. Move it to queue and try later"
            );
            let entry = ReplayEntry::with_ttl(
                UnackedDelivery { token, outcome },
                self.options.ack_replay_ttl,
            );
            if let Err(e) = self.unacked.enqueue(entry) {
                error!(lifecycle = %self.lifecycle.name(), "Unable to defer acknowledgement: {e}");
            }
        }
    }

    async fn replay_unacked(&self, channel: &Arc<S::Channel>) {
        if self.unacked.is_empty() {
            return;
        }

        let subscriber = self.lifecycle.connector().clone();
        let is_ready = || !self.lifecycle.is_stopping() && subscriber.is_open(channel);

        let report = self
            .unacked
            .drain(self.lifecycle.shutdown_token(), is_ready, |unacked| {
                let subscriber = subscriber.clone();
                let channel = channel.clone();
                async move {
                    subscriber
                        .settle(&channel, &unacked.token, unacked.outcome)
                        .await
                }
            })
            .await;

        debug!(lifecycle = %self.lifecycle.name(), ?report, "Ack replay pass finished");
    }
}

#[async_trait]
impl<S: Subscriber> LifecycleHook<S::Channel> for ConsumerInner<S> {
    async fn on_ready(&self, channel: Arc<S::Channel>) {
        self.subscribed.store(false, Ordering::SeqCst);

        let cancel = self.lifecycle.shutdown_token().child_token();
        if let Some(previous) = self.receive_loop.lock().replace(cancel.clone()) {
            previous.cancel();
        }

        self.replay_unacked(&channel).await;

        let Some(inner) = self.me.upgrade() else {
            return;
        };
        self.in_flight.spawn(inner.run_receive_loop(channel, cancel));
        self.subscribed.store(true, Ordering::SeqCst);
    }

    fn is_healthy(&self, _channel: &S::Channel) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }
}
