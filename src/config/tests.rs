use std::env;
use std::fs;
use std::io::Write;
use std::time::Duration;

use serial_test::serial;
use tempfile::TempDir;

use super::*;
use crate::orchestration::ExhaustedPolicy;

fn toml_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("create temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.logging.level, "info");
    assert_eq!(settings.pipeline.name, "pipeline");
    assert_eq!(settings.pipeline.stop_timeout_ms, 30_000);
    assert_eq!(settings.pipeline.exhausted, ExhaustedPolicy::Drop);
    assert_eq!(settings.amqp.port, 5672);
    assert_eq!(settings.kafka.session_timeout_ms, 45_000);
}

#[test]
fn manager_options_come_from_pipeline_settings() {
    let mut settings = Settings::default();
    settings.pipeline.name = "billing".to_string();
    settings.pipeline.max_request_retry_count = 4;
    settings.pipeline.stop_timeout_ms = 1_500;

    let options = settings.pipeline.manager_options();
    assert_eq!(options.name, "billing");
    assert_eq!(options.max_request_retry_count, 4);
    assert_eq!(options.stop_timeout, Duration::from_millis(1_500));
}

#[test]
#[serial]
fn load_config_from_file_overrides_defaults() {
    let file = toml_file(
        r#"
        [logging]
        level = "debug"

        [pipeline]
        name = "orders"
        max_request_retry_count = 3
        exhausted = "reject"

        [kafka]
        bootstrap_servers = "broker-1:9092"
        topic = "orders"

        [amqp]
        host_name = "rabbit-1"
        exchange = "orders"
        "#,
    );

    let settings = load_config_from(file.path()).expect("load_config_from failed");
    assert_eq!(settings.logging.level, "debug");
    assert_eq!(settings.pipeline.name, "orders");
    assert_eq!(settings.pipeline.max_request_retry_count, 3);
    assert_eq!(settings.pipeline.exhausted, ExhaustedPolicy::Reject);
    // unspecified values keep their defaults
    assert_eq!(settings.pipeline.stop_timeout_ms, 30_000);
    assert_eq!(settings.kafka.topic, "orders");
    assert_eq!(settings.kafka.session_timeout_ms, 45_000);
    assert_eq!(settings.amqp.host_name, "rabbit-1");
    assert_eq!(settings.amqp.virtual_host, "/");
}

#[test]
#[serial]
fn environment_overrides_the_file() {
    let file = toml_file(
        r#"
        [pipeline]
        max_request_retry_count = 3

        [kafka]
        topic = "orders"
        "#,
    );

    temp_env::with_vars(
        [
            ("RESILIENT_MQ_PIPELINE__MAX_REQUEST_RETRY_COUNT", Some("5")),
            ("RESILIENT_MQ_KAFKA__GROUP_ID", Some("workers")),
        ],
        || {
            let settings = load_config_from(file.path()).expect("load_config_from failed");
            assert_eq!(settings.pipeline.max_request_retry_count, 5);
            assert_eq!(settings.kafka.topic, "orders");
            assert_eq!(settings.kafka.group_id, "workers");
        },
    );
}

#[test]
#[serial]
fn load_config_reads_the_default_file_from_the_working_directory() {
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    fs::create_dir_all("config").expect("create config dir");
    fs::write(
        "config/default.toml",
        "[pipeline]\nname = \"from-default\"\n",
    )
    .expect("write config file");

    let result = load_config();
    env::set_current_dir(orig).expect("restore cwd");

    assert_eq!(result.expect("load_config failed").pipeline.name, "from-default");
}

#[test]
#[serial]
fn missing_default_file_yields_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    let result = load_config();
    env::set_current_dir(orig).expect("restore cwd");

    assert_eq!(result.expect("load_config failed").pipeline.name, "pipeline");
}

#[test]
fn missing_explicit_file_is_an_error() {
    let result = load_config_from("/nonexistent/resilient-mq.toml");
    assert!(matches!(result, Err(ConfigError::Load(_))));
}
