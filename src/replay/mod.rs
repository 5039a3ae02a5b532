//! Replay queue
//!
//! A `ReplayQueue` buffers actions the broker could not accept at the moment
//! of a fault: acknowledgements whose ack call failed and publishes whose
//! publish call failed. The owning producer/consumer drains it once per
//! successful (re)connection.
//!
//! Concurrency and usage notes:
//! - `enqueue` is safe from any number of tasks and never blocks. It is
//!   backed by an unbounded channel, so it only fails once the queue has been
//!   closed.
//! - `drain` is single-consumer. Concurrent drains serialize on an internal
//!   lock.
//! - An entry is removed before its action runs. A crash mid-replay loses at
//!   most that one entry; no entry is ever replayed twice.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::utils::{BrokerError, Error, Result};

/// One deferred action.
#[derive(Debug, Clone)]
pub struct ReplayEntry<T> {
    pub item: T,
    pub enqueued_at: DateTime<Utc>,
    /// Entries past this instant are discarded instead of replayed.
    pub expires_at: Option<DateTime<Utc>>,
}

impl<T> ReplayEntry<T> {
    pub fn new(item: T) -> Self {
        Self {
            item,
            enqueued_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Entry that expires `ttl` after now. `None` never expires.
    pub fn with_ttl(item: T, ttl: Option<Duration>) -> Self {
        let enqueued_at = Utc::now();
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| enqueued_at + ttl);
        Self {
            item,
            enqueued_at,
            expires_at,
        }
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }
}

/// Counts produced by a single drain pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub replayed: usize,
    pub expired: usize,
    pub failed: usize,
}

impl DrainReport {
    pub fn is_empty(&self) -> bool {
        self.replayed == 0 && self.expired == 0 && self.failed == 0
    }
}

/// FIFO of deferred actions, drained once a connection is healthy.
pub struct ReplayQueue<T> {
    name: String,
    sender: parking_lot::Mutex<Option<UnboundedSender<ReplayEntry<T>>>>,
    receiver: Mutex<UnboundedReceiver<ReplayEntry<T>>>,
    len: AtomicUsize,
}

impl<T: Send + 'static> ReplayQueue<T> {
    pub fn new(name: impl Into<String>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            name: name.into(),
            sender: parking_lot::Mutex::new(Some(sender)),
            receiver: Mutex::new(receiver),
            len: AtomicUsize::new(0),
        }
    }

    /// Push an entry. Fails only after `close`.
    pub fn enqueue(&self, entry: ReplayEntry<T>) -> Result<()> {
        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or(Error::QueueClosed)?;
        // count first so a concurrent drain never sees len underflow
        self.len.fetch_add(1, Ordering::SeqCst);
        if sender.send(entry).is_err() {
            self.len.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::QueueClosed);
        }
        Ok(())
    }

    /// Entries enqueued and not yet drained.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reject further entries. Entries already queued can still be drained.
    pub fn close(&self) {
        self.sender.lock().take();
    }

    /// Replay queued entries oldest first while `is_ready` holds.
    ///
    /// Expired entries are dropped with a warning. A failing action is logged
    /// and the drain moves on to the next entry.
    pub async fn drain<R, F, Fut>(
        &self,
        cancel: &CancellationToken,
        is_ready: R,
        mut action: F,
    ) -> DrainReport
    where
        R: Fn() -> bool,
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<(), BrokerError>>,
    {
        let mut report = DrainReport::default();
        let mut receiver = self.receiver.lock().await;

        while !cancel.is_cancelled() && is_ready() {
            let entry = match receiver.try_recv() {
                Ok(entry) => entry,
                Err(_) => break,
            };
            self.len.fetch_sub(1, Ordering::SeqCst);

            if entry.is_expired(Utc::now()) {
                warn!(
                    queue = %self.name,
                    enqueued_at = %entry.enqueued_at,
                    "Replay entry expired before it could be replayed, discarding"
                );
                report.expired += 1;
                continue;
            }

            match action(entry.item).await {
                Ok(()) => report.replayed += 1,
                Err(e) => {
                    error!(queue = %self.name, "Replay failed, entry dropped: {e}");
                    report.failed += 1;
                }
            }
        }

        if report.replayed > 0 {
            info!(
                queue = %self.name,
                "Replayed {} deferred entr{} successfully",
                report.replayed,
                if report.replayed == 1 { "y" } else { "ies" }
            );
        }

        report
    }
}

impl<T> std::fmt::Debug for ReplayQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayQueue")
            .field("name", &self.name)
            .field("len", &self.len.load(Ordering::SeqCst))
            .finish()
    }
}
