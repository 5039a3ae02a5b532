use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::lifecycle::RecoveryPolicy;
use crate::utils::ConfigError;

/// Options for the AMQP backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmqpOptions {
    /// Broker host. Also used as the log prefix.
    pub host_name: String,
    pub port: u16,
    pub virtual_host: String,
    pub user_name: String,
    pub password: String,
    pub use_ssl: bool,
    /// Health-check period, in seconds. Also the lifetime of a deferred
    /// publish.
    pub network_recovery_interval_secs: u16,
    pub requested_heartbeat_secs: u16,
    /// `direct`, `topic`, `fanout` or `headers`.
    pub exchange_type: String,
    pub exchange: String,
    pub routing_key: String,
    pub queue_name: String,
    /// Consumer prefetch. Zero leaves the broker default.
    pub prefetch_count: u16,
    pub durable: bool,
    /// Dead-letter exchange, queue and routing key. Left empty, no
    /// dead-letter topology is declared.
    pub dead_letter_exchange: String,
    pub dead_letter_routing_key: String,
    pub dead_letter_queue_name: String,
    /// `x-message-ttl` of the primary queue when dead-lettering is set up.
    pub queue_ttl_ms: u32,
    /// Retry budget for request pipelines, see [`AmqpOptions::manager_options`].
    pub max_request_retry_count: u32,
    pub retry_create_delay_ms: u64,
    /// How long a pipeline waits for in-flight handlers on stop.
    pub stop_timeout_ms: u64,
    /// Lifetime of a deferred acknowledgement.
    pub ack_replay_ttl_secs: u64,
    /// Defaults to the machine host name.
    pub consumer_tag: Option<String>,
    /// How long one receive waits for a delivery before reporting idle.
    pub poll_timeout_ms: u64,
}

impl Default for AmqpOptions {
    fn default() -> Self {
        Self {
            host_name: String::new(),
            port: 5672,
            virtual_host: "/".to_string(),
            user_name: String::new(),
            password: String::new(),
            use_ssl: false,
            network_recovery_interval_secs: 10,
            requested_heartbeat_secs: 0,
            exchange_type: "direct".to_string(),
            exchange: String::new(),
            routing_key: String::new(),
            queue_name: String::new(),
            prefetch_count: 0,
            durable: true,
            dead_letter_exchange: String::new(),
            dead_letter_routing_key: String::new(),
            dead_letter_queue_name: String::new(),
            queue_ttl_ms: 3_600_000,
            max_request_retry_count: 0,
            retry_create_delay_ms: 10_000,
            stop_timeout_ms: 30_000,
            ack_replay_ttl_secs: 180,
            consumer_tag: None,
            poll_timeout_ms: 1_000,
        }
    }
}

impl AmqpOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host_name.trim().is_empty() {
            return Err(ConfigError::MissingField("host_name"));
        }
        if self.exchange.trim().is_empty() {
            return Err(ConfigError::MissingField("exchange"));
        }
        if self.queue_name.trim().is_empty() {
            return Err(ConfigError::MissingField("queue_name"));
        }
        if self.network_recovery_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "network_recovery_interval_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.poll_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "poll_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Dead-lettering is set up only when all three names are present.
    pub fn dead_letter_configured(&self) -> bool {
        !self.dead_letter_exchange.is_empty()
            && !self.dead_letter_routing_key.is_empty()
            && !self.dead_letter_queue_name.is_empty()
    }

    pub fn recovery_policy(&self) -> RecoveryPolicy {
        RecoveryPolicy::new(
            self.network_recovery_interval(),
            Duration::from_millis(self.retry_create_delay_ms),
        )
    }

    pub fn network_recovery_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.network_recovery_interval_secs))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Configured consumer tag, or the machine host name.
    pub fn consumer_tag(&self) -> String {
        self.consumer_tag.clone().unwrap_or_else(machine_name)
    }
}

fn machine_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "resilient-mq".to_string())
}
