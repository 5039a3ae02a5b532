//! Connection lifecycle
//!
//! `ConnectionLifecycle` owns one logical connection to one broker endpoint
//! and keeps it alive:
//! - `reconnect_loop` retries `Connector::open` with a fixed delay until it
//!   succeeds or the lifecycle is stopping
//! - every successful connect installs a brand new channel and closes the
//!   displaced one in the background, after the replacement is in place
//! - the first successful connect starts a single health-check task that
//!   wakes every `network_recovery_interval` and drives `reconnect_loop`
//!   itself when the channel turns unhealthy
//!
//! State machine:
//!
//! ```text
//! Disconnected -> Connecting -> Ready -> Reconnecting -> Ready
//!                                   \-> Stopped (explicit stop only)
//! ```

mod state;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::transport::Connector;
use crate::utils::BrokerError;

pub use state::{ConnectionState, RecoveryPolicy};

/// How long `stop` waits for the health-check task before aborting it.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Role-specific work the lifecycle runs around a connection.
#[async_trait]
pub trait LifecycleHook<Ch>: Send + Sync + 'static {
    /// Runs after a new channel has been installed, before the state turns
    /// `Ready`. Producers drain unpublished messages here, consumers start
    /// their receive loop.
    async fn on_ready(&self, channel: Arc<Ch>);

    /// Extra health condition on top of `Connector::is_open`.
    fn is_healthy(&self, _channel: &Ch) -> bool {
        true
    }
}

/// Owns one broker channel: opens it, watches its health and rebuilds it
/// when it drops.
pub struct ConnectionLifecycle<C: Connector> {
    name: String,
    connector: Arc<C>,
    policy: RecoveryPolicy,
    current: RwLock<Option<Arc<C::Channel>>>,
    state: watch::Sender<ConnectionState>,
    stopping: AtomicBool,
    stopped: AtomicBool,
    health_check_created: AtomicBool,
    health_loops_started: AtomicUsize,
    reconnect_lock: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Connector> ConnectionLifecycle<C> {
    pub fn new(name: impl Into<String>, connector: Arc<C>, policy: RecoveryPolicy) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            name: name.into(),
            connector,
            policy,
            current: RwLock::new(None),
            state,
            stopping: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            health_check_created: AtomicBool::new(false),
            health_loops_started: AtomicUsize::new(0),
            reconnect_lock: tokio::sync::Mutex::new(()),
            shutdown: CancellationToken::new(),
            health_task: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connector(&self) -> &Arc<C> {
        &self.connector
    }

    pub fn policy(&self) -> RecoveryPolicy {
        self.policy
    }

    /// The channel currently installed, if any.
    pub fn current(&self) -> Option<Arc<C::Channel>> {
        self.current.read().clone()
    }

    /// The current channel if it reports itself open.
    pub fn open_channel(&self) -> Option<Arc<C::Channel>> {
        self.current().filter(|channel| self.connector.is_open(channel))
    }

    /// Latest published state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver for every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Resolves once the lifecycle is `Ready` (true) or `Stopped` (false).
    pub async fn wait_until_ready(&self) -> bool {
        let mut state = self.state.subscribe();
        match state
            .wait_for(|s| matches!(s, ConnectionState::Ready | ConnectionState::Stopped))
            .await
        {
            Ok(s) => *s == ConnectionState::Ready,
            Err(_) => false,
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Token cancelled when the lifecycle begins stopping. Child tokens are
    /// handed to receive loops.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Number of health-check tasks ever spawned. Never exceeds one.
    pub fn health_loops_started(&self) -> usize {
        self.health_loops_started.load(Ordering::SeqCst)
    }

    /// True when a channel is installed, open and accepted by `hook`.
    pub fn is_healthy(&self, hook: &dyn LifecycleHook<C::Channel>) -> bool {
        match self.current() {
            Some(channel) => self.connector.is_open(&channel) && hook.is_healthy(&channel),
            None => false,
        }
    }

    /// Open a new channel and install it, retiring the previous one.
    pub async fn connect(&self) -> Result<Arc<C::Channel>, BrokerError> {
        let endpoint = self.connector.endpoint();
        info!(lifecycle = %self.name, "{endpoint}: create connection - Start");

        let channel = Arc::new(self.connector.open().await?);
        let previous = self.current.write().replace(channel.clone());

        info!(lifecycle = %self.name, "{endpoint}: create connection - Finished");

        if let Some(previous) = previous {
            self.retire(previous);
        }

        Ok(channel)
    }

    fn retire(&self, channel: Arc<C::Channel>) {
        let connector = self.connector.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            if let Err(e) = connector.close(&channel).await {
                warn!(lifecycle = %name, "Error while disposing old channel: {e}");
            }
        });
    }

    /// Connect, retrying every `retry_create_delay` until it works.
    ///
    /// Returns `false` without connecting when the lifecycle is stopping.
    /// Only one reconnect sequence runs at a time; a caller arriving while
    /// another sequence holds the lock returns as soon as the connection is
    /// healthy again.
    pub async fn reconnect_loop(self: &Arc<Self>, hook: Arc<dyn LifecycleHook<C::Channel>>) -> bool {
        let _sequence = self.reconnect_lock.lock().await;

        if self.is_stopping() {
            return false;
        }
        if self.is_healthy(hook.as_ref()) {
            return true;
        }

        let mut attempt: u64 = 0;
        loop {
            if self.is_stopping() {
                return false;
            }

            attempt += 1;
            let next = if self.current().is_some() {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Connecting
            };
            self.set_state(next);

            let connected = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!(lifecycle = %self.name, "Reconnect cancelled");
                    return false;
                }
                connected = self.connect() => connected,
            };

            match connected {
                Ok(channel) => {
                    if self.is_stopping() {
                        self.discard(channel).await;
                        return false;
                    }

                    hook.on_ready(channel).await;
                    self.set_state(ConnectionState::Ready);
                    info!(lifecycle = %self.name, attempt, "Connection ready");

                    self.ensure_health_check(hook.clone());
                    return true;
                }
                Err(e) => {
                    error!(
                        lifecycle = %self.name,
                        attempt,
                        "{}: reconnection failed: {e}",
                        self.connector.endpoint()
                    );

                    if self.is_stopping() {
                        return false;
                    }

                    tokio::select! {
                        _ = self.shutdown.cancelled() => {
                            info!(lifecycle = %self.name, "Reconnect cancelled");
                            return false;
                        }
                        _ = tokio::time::sleep(self.policy.retry_create_delay) => {}
                    }
                }
            }
        }
    }

    async fn discard(&self, channel: Arc<C::Channel>) {
        {
            let mut current = self.current.write();
            if current
                .as_ref()
                .is_some_and(|installed| Arc::ptr_eq(installed, &channel))
            {
                current.take();
            }
        }

        if let Err(e) = self.connector.close(&channel).await {
            warn!(lifecycle = %self.name, "Error closing channel opened during stop: {e}");
        }
    }

    fn ensure_health_check(self: &Arc<Self>, hook: Arc<dyn LifecycleHook<C::Channel>>) {
        if self.health_check_created.swap(true, Ordering::SeqCst) {
            return;
        }

        self.health_loops_started.fetch_add(1, Ordering::SeqCst);
        let handle = tokio::spawn(self.clone().health_check_loop(hook));
        *self.health_task.lock() = Some(handle);
    }

    async fn health_check_loop(self: Arc<Self>, hook: Arc<dyn LifecycleHook<C::Channel>>) {
        info!(
            lifecycle = %self.name,
            "{}: connection check - Start",
            self.connector.endpoint()
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.policy.network_recovery_interval) => {}
            }

            if self.is_stopping() {
                break;
            }

            if self.is_healthy(hook.as_ref()) {
                continue;
            }

            info!(
                lifecycle = %self.name,
                "{}: reconnect raised",
                self.connector.endpoint()
            );
            self.set_state(ConnectionState::Reconnecting);
            self.reconnect_loop(hook.clone()).await;
        }

        info!(lifecycle = %self.name, "Connection check - Canceled");
    }

    /// Flag the lifecycle as stopping and cancel every wait it owns.
    ///
    /// Channels stay open so in-flight work can still settle; `stop`
    /// finishes the job. Returns `true` for the first caller only.
    pub fn begin_stop(&self) -> bool {
        let first = !self.stopping.swap(true, Ordering::SeqCst);
        self.shutdown.cancel();
        first
    }

    /// Stop the lifecycle. Idempotent and safe before any connect.
    pub async fn stop(&self) {
        self.begin_stop();
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let health = self.health_task.lock().take();
        if let Some(mut handle) = health {
            if tokio::time::timeout(STOP_GRACE, &mut handle).await.is_err() {
                warn!(lifecycle = %self.name, "Connection check did not exit in time, aborting");
                handle.abort();
            }
        }

        // wait out a reconnect sequence that is still unwinding
        let _sequence = self.reconnect_lock.lock().await;

        let current = self.current.write().take();
        if let Some(channel) = current {
            if let Err(e) = self.connector.close(&channel).await {
                error!(lifecycle = %self.name, "Error while closing connection: {e}");
            }
        }

        self.set_state(ConnectionState::Stopped);
        info!(lifecycle = %self.name, "Connection closed");
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_replace(next);
    }
}

impl<C: Connector> std::fmt::Debug for ConnectionLifecycle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLifecycle")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("stopping", &self.is_stopping())
            .finish()
    }
}
