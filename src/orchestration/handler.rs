use async_trait::async_trait;
use thiserror::Error;

use crate::dispatch::RetryableMessage;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Why a handler could not process a request.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Worth another attempt, as long as the retry budget allows it.
    #[error("{0}")]
    Retryable(BoxError),

    /// Will fail again no matter how often it is retried.
    #[error("{0}")]
    Permanent(BoxError),
}

impl HandlerError {
    pub fn retryable(error: impl Into<BoxError>) -> Self {
        Self::Retryable(error.into())
    }

    pub fn permanent(error: impl Into<BoxError>) -> Self {
        Self::Permanent(error.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Application logic plugged into a `ConsumerProcessorManager`.
#[async_trait]
pub trait RequestHandler<T: Send + Sync + 'static>: Send + Sync + 'static {
    async fn start(&self) -> Result<(), HandlerError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), HandlerError> {
        Ok(())
    }

    async fn handle(&self, message: &RetryableMessage<T>) -> Result<(), HandlerError>;
}
