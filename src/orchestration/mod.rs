//! Consumer processor pipeline
//!
//! `ConsumerProcessorManager` drives a `RequestConsumer` and an application
//! `RequestHandler`:
//! - every decoded request is handled on its own task
//! - success acknowledges the delivery
//! - a retryable failure with budget left republishes the request with its
//!   retry count bumped, then acknowledges the original delivery
//! - a permanent failure, or a failure at `max_request_retry_count`, is
//!   logged as given up and settled according to `ExhaustedPolicy`
//!
//! A handler therefore sees one request at most `max_request_retry_count + 1`
//! times. Handler panics are caught and count as retryable failures.

mod handler;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::dispatch::{Request, RequestConsumer, RequestDelivery};
use crate::transport::{Publisher, Subscriber};
use crate::utils::{Error, Result};

pub use handler::{BoxError, HandlerError, RequestHandler};

/// What happens to a delivery whose request will not be retried again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExhaustedPolicy {
    /// Acknowledge and log. The request is gone.
    #[default]
    Drop,
    /// Negatively acknowledge, so a broker-side dead-letter topology can
    /// capture it.
    Reject,
}

/// Settings for a [`ConsumerProcessorManager`].
///
/// Backends build these from their own options with `manager_options`.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Pipeline name used in logs.
    pub name: String,
    /// Retries allowed after the first attempt.
    pub max_request_retry_count: u32,
    /// What happens to a request that cannot be retried.
    pub exhausted: ExhaustedPolicy,
    /// How long `stop` waits for handlers in flight.
    pub stop_timeout: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            name: "pipeline".to_string(),
            max_request_retry_count: 0,
            exhausted: ExhaustedPolicy::Drop,
            stop_timeout: Duration::from_secs(30),
        }
    }
}

impl ManagerOptions {
    pub fn new(name: impl Into<String>, max_request_retry_count: u32) -> Self {
        Self {
            name: name.into(),
            max_request_retry_count,
            ..Default::default()
        }
    }
}

/// Drives a [`RequestHandler`] from a [`RequestConsumer`], retrying
/// failed requests through the producer.
pub struct ConsumerProcessorManager<T, H, P, S>
where
    T: Request,
    H: RequestHandler<T>,
    P: Publisher,
    S: Subscriber,
{
    inner: Arc<ManagerInner<T, H, P, S>>,
}

struct ManagerInner<T, H, P, S>
where
    T: Request,
    H: RequestHandler<T>,
    P: Publisher,
    S: Subscriber,
{
    options: ManagerOptions,
    bridge: RequestConsumer<T, P, S>,
    handler: H,
    cancel: CancellationToken,
    in_flight: TaskTracker,
    started: AtomicBool,
    stopped: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<T, H, P, S> ConsumerProcessorManager<T, H, P, S>
where
    T: Request,
    H: RequestHandler<T>,
    P: Publisher,
    S: Subscriber,
{
    pub fn new(bridge: RequestConsumer<T, P, S>, handler: H, options: ManagerOptions) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                options,
                bridge,
                handler,
                cancel: CancellationToken::new(),
                in_flight: TaskTracker::new(),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Pipeline name.
    pub fn name(&self) -> &str {
        &self.inner.options.name
    }

    pub fn bridge(&self) -> &RequestConsumer<T, P, S> {
        &self.inner.bridge
    }

    pub fn handler(&self) -> &H {
        &self.inner.handler
    }

    /// Start the handler, then begin dispatching. Connecting happens in the
    /// background; this returns as soon as the pipeline is wired up.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.stopped.load(Ordering::SeqCst) {
            warn!(pipeline = %inner.options.name, "Start called after stop, ignoring");
            return Ok(());
        }
        if inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!(pipeline = %inner.options.name, "Starting ConsumerProcessorManager");

        if let Err(e) = inner.handler.start().await {
            error!(pipeline = %inner.options.name, "Request handler failed to start: {e}");
            return Err(Error::HandlerStart(e));
        }

        let dispatch = tokio::spawn(inner.clone().dispatch_loop());
        let bridge = {
            let inner = inner.clone();
            tokio::spawn(async move {
                if inner.bridge.start().await {
                    info!(pipeline = %inner.options.name, "Request consumer connected");
                }
            })
        };
        inner.tasks.lock().extend([dispatch, bridge]);

        info!(pipeline = %inner.options.name, "ConsumerProcessorManager started");
        Ok(())
    }

    /// Stop dispatching, give in-flight requests up to `timeout`, then stop
    /// the bridge and the handler. Idempotent and safe before `start`.
    pub async fn stop(&self, timeout: Duration) {
        let inner = &self.inner;
        if inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        warn!(pipeline = %inner.options.name, "Stopping ConsumerProcessorManager");
        inner.cancel.cancel();

        // the consumer waits for in-flight replies, which come from our tasks
        inner.bridge.stop(timeout).await;

        inner.in_flight.close();
        if tokio::time::timeout(timeout, inner.in_flight.wait())
            .await
            .is_err()
        {
            warn!(
                pipeline = %inner.options.name,
                "{} request(s) still being handled after {timeout:?}",
                inner.in_flight.len()
            );
        }

        let tasks = std::mem::take(&mut *inner.tasks.lock());
        for mut task in tasks {
            if tokio::time::timeout(timeout, &mut task).await.is_err() {
                task.abort();
            }
        }

        if inner.started.load(Ordering::SeqCst) {
            if let Err(e) = inner.handler.stop().await {
                error!(pipeline = %inner.options.name, "Request handler failed to stop: {e}");
            }
        }

        warn!(pipeline = %inner.options.name, "ConsumerProcessorManager stopped");
    }

    /// `stop` with the configured timeout.
    pub async fn shutdown(&self) {
        self.stop(self.inner.options.stop_timeout).await;
    }
}

impl<T, H, P, S> ManagerInner<T, H, P, S>
where
    T: Request,
    H: RequestHandler<T>,
    P: Publisher,
    S: Subscriber,
{
    async fn dispatch_loop(self: Arc<Self>) {
        loop {
            let delivery = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                delivery = self.bridge.recv() => delivery,
            };

            let Some(delivery) = delivery else {
                break;
            };

            let inner = self.clone();
            self.in_flight.spawn(async move { inner.process(delivery).await });
        }

        info!(pipeline = %self.options.name, "Dispatch loop stopped");
    }

    async fn process(&self, delivery: RequestDelivery<T>) {
        let RequestDelivery { message, ack } = delivery;
        let name = &self.options.name;
        debug!(pipeline = %name, retry_count = message.retry_count(), "Processing request");

        let outcome = AssertUnwindSafe(self.handler.handle(&message))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(())) => {
                debug!(pipeline = %name, "Processing request completed");
                ack.accept();
                return;
            }
            Ok(Err(e)) => e,
            Err(panic) => HandlerError::retryable(panic_message(panic.as_ref())),
        };

        let exhausted = message.retry_count() >= self.options.max_request_retry_count;
        if !failure.is_retryable() || exhausted {
            error!(
                pipeline = %name,
                retry_count = message.retry_count(),
                "Error processing request: {failure}. Giving up"
            );
            match self.options.exhausted {
                ExhaustedPolicy::Drop => ack.accept(),
                ExhaustedPolicy::Reject => ack.reject(),
            }
            return;
        }

        let next = message.next_attempt();
        match self.bridge.retry(&next).await {
            Ok(()) => {
                warn!(
                    pipeline = %name,
                    "Error processing request: {failure}. Retry count: {}",
                    next.retry_count()
                );
                ack.accept();
            }
            Err(e) => {
                // leave the delivery unsettled so the broker hands it out again
                error!(pipeline = %name, "Unable to requeue request after failure ({failure}): {e}");
                drop(ack);
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("handler panicked: {message}")
    } else {
        "handler panicked".to_string()
    }
}
