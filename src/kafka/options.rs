use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::lifecycle::RecoveryPolicy;
use crate::utils::ConfigError;

/// Client properties handed to the driver, librdkafka style.
pub type ClientProperties = BTreeMap<String, String>;

/// Options for the partitioned-log backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaOptions {
    /// Comma separated `host:port` list.
    pub bootstrap_servers: String,
    /// Topic consumed from, and the default produce target.
    pub topic: String,
    pub group_id: String,
    /// Left off: offsets are committed once a record is settled.
    pub enable_auto_commit: bool,
    pub allow_auto_create_topics: bool,
    /// Partition EOF arrives as an empty record, committed and skipped.
    pub enable_partition_eof: bool,
    pub max_poll_interval_ms: u32,
    pub session_timeout_ms: u32,
    pub heartbeat_interval_ms: u32,
    pub statistics_interval_ms: u32,
    /// Retry budget for request pipelines, see [`KafkaOptions::manager_options`].
    pub max_request_retry_count: u32,
    /// Delay before retrying a failed client creation.
    pub retry_create_delay_ms: u64,
    /// Delay before reopening a dropped connection. Must be non-zero.
    pub network_recovery_interval_ms: u64,
    /// How long one poll waits for a record before reporting idle.
    pub poll_timeout_ms: u64,
    /// Upper bound for the flush that follows every produce.
    pub flush_timeout_ms: u64,
}

impl Default for KafkaOptions {
    fn default() -> Self {
        Self {
            bootstrap_servers: String::new(),
            topic: String::new(),
            group_id: String::new(),
            enable_auto_commit: false,
            allow_auto_create_topics: true,
            enable_partition_eof: true,
            max_poll_interval_ms: 3_600_000,
            session_timeout_ms: 45_000,
            heartbeat_interval_ms: 3_000,
            statistics_interval_ms: 3_000,
            max_request_retry_count: 0,
            retry_create_delay_ms: 60_000,
            network_recovery_interval_ms: 60_000,
            poll_timeout_ms: 1_000,
            flush_timeout_ms: 10_000,
        }
    }
}

impl KafkaOptions {
    /// Checks what the producing side needs.
    pub fn validate_producer(&self) -> Result<(), ConfigError> {
        if self.bootstrap_servers.trim().is_empty() {
            return Err(ConfigError::MissingField("bootstrap_servers"));
        }
        if self.network_recovery_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "network_recovery_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Producer checks plus the topic and poll timeout.
    pub fn validate_consumer(&self) -> Result<(), ConfigError> {
        self.validate_producer()?;
        if self.topic.trim().is_empty() {
            return Err(ConfigError::MissingField("topic"));
        }
        if self.poll_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "poll_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Client properties for the consumer.
    pub fn consumer_properties(&self) -> ClientProperties {
        let mut properties = ClientProperties::new();
        properties.insert("bootstrap.servers".into(), self.bootstrap_servers.clone());
        properties.insert("group.id".into(), self.group_id.clone());
        properties.insert("enable.auto.commit".into(), self.enable_auto_commit.to_string());
        properties.insert(
            "allow.auto.create.topics".into(),
            self.allow_auto_create_topics.to_string(),
        );
        properties.insert(
            "enable.partition.eof".into(),
            self.enable_partition_eof.to_string(),
        );
        properties.insert("auto.offset.reset".into(), "earliest".into());
        properties.insert(
            "max.poll.interval.ms".into(),
            self.max_poll_interval_ms.to_string(),
        );
        properties.insert(
            "session.timeout.ms".into(),
            self.session_timeout_ms.to_string(),
        );
        properties.insert(
            "statistics.interval.ms".into(),
            self.statistics_interval_ms.to_string(),
        );
        properties.insert(
            "heartbeat.interval.ms".into(),
            self.heartbeat_interval_ms.to_string(),
        );
        properties
    }

    pub fn producer_properties(&self) -> ClientProperties {
        let mut properties = ClientProperties::new();
        properties.insert("bootstrap.servers".into(), self.bootstrap_servers.clone());
        properties.insert(
            "allow.auto.create.topics".into(),
            self.allow_auto_create_topics.to_string(),
        );
        properties.insert("client.id".into(), self.group_id.clone());
        properties
    }

    pub fn recovery_policy(&self) -> RecoveryPolicy {
        RecoveryPolicy::new(
            Duration::from_millis(self.network_recovery_interval_ms),
            Duration::from_millis(self.retry_create_delay_ms),
        )
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}
