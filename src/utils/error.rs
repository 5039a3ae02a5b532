//! The `error` module defines the error taxonomy used across `resilient_mq`.
//!
//! Errors are split by how they are handled rather than by where they occur:
//!
//! - `BrokerError`: transient connectivity faults. These never reach the
//!   application; they are absorbed by reconnect loops and replay queues.
//! - `ConfigError`: missing or invalid options. Fatal at construction time.
//! - `CodecError`: malformed payloads. The single message is dropped.
//! - `Error`: the crate-level error that wraps the above for the few calls
//!   that can fail outright.

use thiserror::Error;

/// Transient fault reported by a broker backend.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("connect to {endpoint} failed: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("publish to {destination} failed: {reason}")]
    Publish { destination: String, reason: String },

    #[error("acknowledge failed: {0}")]
    Ack(String),

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("topology declaration failed: {0}")]
    Topology(String),

    #[error("channel is closed")]
    Closed,
}

impl BrokerError {
    pub fn connect(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        Self::Connect {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    pub fn publish(destination: impl ToString, reason: impl ToString) -> Self {
        Self::Publish {
            destination: destination.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Missing or invalid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required option `{0}` is missing")]
    MissingField(&'static str),

    #[error("option `{field}` is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Wire payload could not be decoded or encoded.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("payload is not valid JSON: {0}")]
    Syntax(#[from] serde_json::Error),

    #[error("payload must be a JSON object")]
    NotAnObject,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("replay queue is closed")]
    QueueClosed,

    #[error("inbound deliveries were already taken")]
    AlreadySubscribed,

    #[error("request handler failed to start: {0}")]
    HandlerStart(#[source] crate::orchestration::HandlerError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
