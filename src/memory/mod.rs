//! In-process broker backend.
//!
//! `MemoryBroker` keeps one append-only log per destination and a committed
//! cursor per log. It implements the same capability traits as the real
//! backends and adds fault injection, which makes it the backend of choice
//! for exercising reconnect and replay behaviour without a network.
//!
//! Concurrency and usage notes:
//! - All state sits behind one `parking_lot::Mutex`; no lock is held across
//!   an await point.
//! - `set_online(false)` and `drop_connections` sever every open channel.
//!   Channels never come back to life; the lifecycle has to open new ones.
//! - Only `Outcome::Ack` moves the committed cursor. Rejected records are
//!   recorded in `settlements` and delivered again after a reconnect.

mod adapter;
mod engine;
mod topic;

pub use adapter::{MemoryChannel, MemoryPublisher, MemorySubscriber};
pub use engine::{MemoryBroker, Settlement};
pub use topic::Topic;

impl MemoryBroker {
    pub fn publisher(&self) -> MemoryPublisher {
        MemoryPublisher::new(self.clone())
    }

    pub fn subscriber(&self, source: crate::transport::Destination) -> MemorySubscriber {
        MemorySubscriber::new(self.clone(), source)
    }
}
