use std::time::Duration;

use serde::Deserialize;

use crate::amqp::AmqpOptions;
use crate::kafka::KafkaOptions;
use crate::orchestration::{ExhaustedPolicy, ManagerOptions};

/// Top-level configuration for an embedding process.
///
/// Groups logging, pipeline and per-backend options.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub pipeline: PipelineSettings,
    pub kafka: KafkaOptions,
    pub amqp: AmqpOptions,
}

/// Default log level, used when `RUST_LOG` is not set.
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

/// Options for a `ConsumerProcessorManager`.
#[derive(Debug, Deserialize, Clone)]
pub struct PipelineSettings {
    pub name: String,
    pub max_request_retry_count: u32,
    pub stop_timeout_ms: u64,
    pub exhausted: ExhaustedPolicy,
}

impl PipelineSettings {
    /// Backend-agnostic alternative to the backend `manager_options`,
    /// for pipelines built with `ConsumerProcessorManager::new` directly.
    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            name: self.name.clone(),
            max_request_retry_count: self.max_request_retry_count,
            exhausted: self.exhausted,
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
        }
    }
}

/// Settings as found in files or the environment, every field optional.
/// Backend sections fill their own gaps through `#[serde(default)]`.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub logging: Option<PartialLoggingSettings>,
    pub pipeline: Option<PartialPipelineSettings>,
    pub kafka: Option<KafkaOptions>,
    pub amqp: Option<AmqpOptions>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialPipelineSettings {
    pub name: Option<String>,
    pub max_request_retry_count: Option<u32>,
    pub stop_timeout_ms: Option<u64>,
    pub exhausted: Option<ExhaustedPolicy>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            logging: LoggingSettings {
                level: "info".to_string(),
            },
            pipeline: PipelineSettings {
                name: "pipeline".to_string(),
                max_request_retry_count: 0,
                stop_timeout_ms: 30_000,
                exhausted: ExhaustedPolicy::Drop,
            },
            kafka: KafkaOptions::default(),
            amqp: AmqpOptions::default(),
        }
    }
}

impl PartialSettings {
    /// Fill every missing value from `Settings::default()`.
    pub fn merge(self) -> Settings {
        let default = Settings::default();
        let logging = self.logging.as_ref();
        let pipeline = self.pipeline.as_ref();

        Settings {
            logging: LoggingSettings {
                level: logging
                    .and_then(|l| l.level.clone())
                    .unwrap_or(default.logging.level),
            },
            pipeline: PipelineSettings {
                name: pipeline
                    .and_then(|p| p.name.clone())
                    .unwrap_or(default.pipeline.name),
                max_request_retry_count: pipeline
                    .and_then(|p| p.max_request_retry_count)
                    .unwrap_or(default.pipeline.max_request_retry_count),
                stop_timeout_ms: pipeline
                    .and_then(|p| p.stop_timeout_ms)
                    .unwrap_or(default.pipeline.stop_timeout_ms),
                exhausted: pipeline
                    .and_then(|p| p.exhausted)
                    .unwrap_or(default.pipeline.exhausted),
            },
            kafka: self.kafka.unwrap_or(default.kafka),
            amqp: self.amqp.unwrap_or(default.amqp),
        }
    }
}
