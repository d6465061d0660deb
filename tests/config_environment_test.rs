// ABOUTME: Unit tests for environment-driven server and logging configuration
// ABOUTME: Defaults, overrides, invalid values and log-safe summaries; serialized because they mutate env
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use serial_test::serial;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use taskhub_auth::{
    config::{RedisConnectionConfig, ServerConfig},
    errors::ErrorCode,
    logging::{LogFormat, LoggingConfig},
};

const MANAGED_VARS: &[&str] = &[
    "HTTP_PORT",
    "REDIS_URL",
    "KEY_UPDATE_TOPIC",
    "KEY_CONSUMER_BACKOFF_SECS",
    "SERVICE_NAME",
    "KEY_DIR",
    "RSA_KEY_BITS",
    "KEY_ROTATION_INTERVAL_HOURS",
    "KEY_ROTATION_ENABLED",
    "TOKEN_TTL_HOURS",
    "BOOTSTRAP_PUBLIC_KEY_PATH",
    "KEY_RETENTION_ENABLED",
    "RATE_LIMIT_API",
    "RATE_LIMIT_STRICT",
    "RATE_LIMIT_WINDOW_SECS",
    "RATE_LIMIT_STORE_TIMEOUT_MS",
    "SESSION_STORE_TIMEOUT_MS",
    "REDIS_CONNECTION_TIMEOUT_SECS",
    "LOG_FORMAT",
    "ENVIRONMENT",
];

fn clear_env() {
    for var in MANAGED_VARS {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_empty_environment_yields_defaults() {
    clear_env();
    let config = ServerConfig::from_env().unwrap();

    assert_eq!(config.http_port, 8080);
    assert!(config.redis_url.is_none());
    assert_eq!(config.broker.topic, "key-updates");
    assert_eq!(config.key_issuer.service_name, "userService");
    assert_eq!(config.key_issuer.key_dir, PathBuf::from("./keys"));
    assert_eq!(config.key_issuer.rsa_key_bits, 2048);
    assert!(config.key_issuer.rotation_enabled);
    assert_eq!(config.token.ttl(), chrono::Duration::hours(24));
    assert!(!config.token.key_retention_enabled);
    assert_eq!(config.rate_limit.api_limit, 200);
    assert_eq!(config.rate_limit.strict_limit, 20);
    assert_eq!(config.rate_limit.window(), Duration::from_secs(60));
    assert_eq!(config.session.store_timeout(), Duration::from_secs(5));
}

#[test]
#[serial]
fn test_environment_overrides() {
    clear_env();
    env::set_var("HTTP_PORT", "9090");
    env::set_var("REDIS_URL", "redis://localhost:6379");
    env::set_var("KEY_UPDATE_TOPIC", "keys-v2");
    env::set_var("KEY_ROTATION_INTERVAL_HOURS", "6");
    env::set_var("KEY_ROTATION_ENABLED", "false");
    env::set_var("RATE_LIMIT_API", "50");
    env::set_var("RATE_LIMIT_WINDOW_SECS", "30");
    env::set_var("BOOTSTRAP_PUBLIC_KEY_PATH", "/etc/taskhub/public.pem");

    let config = ServerConfig::from_env().unwrap();
    clear_env();

    assert_eq!(config.http_port, 9090);
    assert_eq!(config.redis_url.as_deref(), Some("redis://localhost:6379"));
    assert_eq!(config.broker.topic, "keys-v2");
    assert_eq!(config.key_issuer.rotation_interval(), Duration::from_secs(6 * 3600));
    assert!(!config.key_issuer.rotation_enabled);
    assert_eq!(config.rate_limit.api_limit, 50);
    assert_eq!(config.rate_limit.window_secs, 30);
    assert_eq!(
        config.token.bootstrap_public_key_path,
        Some(PathBuf::from("/etc/taskhub/public.pem"))
    );
}

#[test]
#[serial]
fn test_blank_redis_url_means_in_memory() {
    clear_env();
    env::set_var("REDIS_URL", "   ");
    let config = ServerConfig::from_env().unwrap();
    clear_env();

    assert!(config.redis_url.is_none());
    assert!(config.summary().contains("backend=in-memory"));
}

#[test]
#[serial]
fn test_unparsable_value_is_an_error() {
    clear_env();
    env::set_var("RATE_LIMIT_API", "lots");
    let err = ServerConfig::from_env().unwrap_err();
    clear_env();

    assert_eq!(err.code, ErrorCode::ConfigInvalid);
    assert!(err.message.contains("RATE_LIMIT_API"));
}

#[test]
#[serial]
fn test_zero_rotation_interval_is_rejected() {
    clear_env();
    env::set_var("KEY_ROTATION_INTERVAL_HOURS", "0");
    let err = ServerConfig::from_env().unwrap_err();
    clear_env();

    assert_eq!(err.code, ErrorCode::ConfigInvalid);
    assert!(err.message.contains("KEY_ROTATION_INTERVAL_HOURS"));
}

#[test]
#[serial]
fn test_redis_connection_overrides() {
    clear_env();
    env::set_var("REDIS_CONNECTION_TIMEOUT_SECS", "9");
    let config = RedisConnectionConfig::from_env().unwrap();
    clear_env();

    assert_eq!(config.connection_timeout_secs, 9);
    assert_eq!(
        config.response_timeout_secs,
        RedisConnectionConfig::default().response_timeout_secs
    );
}

#[test]
fn test_validate_rejects_empty_topic() {
    let mut config = ServerConfig::default();
    config.broker.topic = "  ".to_owned();
    assert_eq!(config.validate().unwrap_err().code, ErrorCode::ConfigInvalid);
}

#[test]
fn test_summary_carries_no_secrets() {
    let config = ServerConfig {
        redis_url: Some("redis://:hunter2@cache.internal:6379".to_owned()),
        ..ServerConfig::default()
    };
    let summary = config.summary();
    assert!(!summary.contains("hunter2"));
    assert!(!summary.contains("cache.internal"));
    assert!(summary.contains("topic=key-updates"));
}

#[test]
#[serial]
fn test_production_logging_includes_spans() {
    clear_env();
    env::set_var("ENVIRONMENT", "production");
    env::set_var("LOG_FORMAT", "json");
    let config = LoggingConfig::from_env();
    clear_env();

    assert_eq!(config.format, LogFormat::Json);
    assert!(config.include_spans);
    assert!(config.include_location);
    assert_eq!(config.environment, "production");
}
