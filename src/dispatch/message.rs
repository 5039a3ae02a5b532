use std::sync::Arc;

use crate::transport::DeliveryToken;

/// A decoded request together with how many times it has been retried.
///
/// The request itself is shared, so `next_attempt` is cheap and never
/// touches the original.
#[derive(Debug)]
pub struct RetryableMessage<T> {
    request: Arc<T>,
    retry_count: u32,
    token: Option<DeliveryToken>,
    payload: Arc<[u8]>,
}

impl<T> Clone for RetryableMessage<T> {
    fn clone(&self) -> Self {
        Self {
            request: self.request.clone(),
            retry_count: self.retry_count,
            token: self.token.clone(),
            payload: self.payload.clone(),
        }
    }
}

impl<T> RetryableMessage<T> {
    /// A message that has not been delivered yet.
    pub fn new(request: T) -> Self {
        Self {
            request: Arc::new(request),
            retry_count: 0,
            token: None,
            payload: Arc::from(Vec::new()),
        }
    }

    pub(crate) fn received(
        request: T,
        retry_count: u32,
        token: DeliveryToken,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            request: Arc::new(request),
            retry_count,
            token: Some(token),
            payload: Arc::from(payload),
        }
    }

    /// The decoded request.
    pub fn request(&self) -> &T {
        &self.request
    }

    /// Retries so far. Zero on first delivery.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Token of the delivery this message was decoded from.
    pub fn token(&self) -> Option<&DeliveryToken> {
        self.token.as_ref()
    }

    /// Raw bytes this message was decoded from. Empty for messages that were
    /// never delivered.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The same request with the retry count bumped by one. The result is
    /// not bound to any delivery.
    pub fn next_attempt(&self) -> Self {
        Self {
            request: self.request.clone(),
            retry_count: self.retry_count.saturating_add(1),
            token: None,
            payload: self.payload.clone(),
        }
    }
}
