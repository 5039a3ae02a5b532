use tokio::sync::oneshot;

use crate::transport::{Delivery, DeliveryToken};

/// One delivery handed downstream, plus the means to answer for it.
#[derive(Debug)]
pub struct Inbound {
    pub delivery: Delivery,
    pub ack: Acknowledger,
}

impl Inbound {
    pub(crate) fn new(delivery: Delivery, reply: oneshot::Sender<bool>) -> Self {
        Self {
            delivery,
            ack: Acknowledger { reply },
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.delivery.payload
    }

    pub fn token(&self) -> &DeliveryToken {
        &self.delivery.token
    }
}

/// Answers for exactly one delivery.
///
/// `accept` acknowledges it, `reject` negatively acknowledges it without
/// requeue. Dropping the acknowledger without answering abandons the
/// delivery: it stays unsettled and the broker redelivers it later.
#[derive(Debug)]
pub struct Acknowledger {
    reply: oneshot::Sender<bool>,
}

impl Acknowledger {
    pub fn complete(self, accepted: bool) {
        // the consumer may already be gone; the broker redelivers in that case
        let _ = self.reply.send(accepted);
    }

    pub fn accept(self) {
        self.complete(true);
    }

    pub fn reject(self) {
        self.complete(false);
    }
}
