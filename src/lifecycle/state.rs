use std::fmt;
use std::time::Duration;

/// Observable state of a `ConnectionLifecycle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Reconnecting,
    Stopped,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Reconnecting => "reconnecting",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Timing knobs for connection recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    /// Period of the health check.
    pub network_recovery_interval: Duration,
    /// Fixed delay between failed connect attempts.
    pub retry_create_delay: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            network_recovery_interval: Duration::from_secs(60),
            retry_create_delay: Duration::from_secs(60),
        }
    }
}

impl RecoveryPolicy {
    pub fn new(network_recovery_interval: Duration, retry_create_delay: Duration) -> Self {
        Self {
            network_recovery_interval,
            retry_create_delay,
        }
    }
}
