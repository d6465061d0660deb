// ABOUTME: Environment-based server configuration for the issuer and gateway roles
// ABOUTME: Parses ports, key rotation, token, rate limit and session settings with validation
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

//! Environment-only configuration
//!
//! Every setting has a default, so an empty environment yields a working
//! single-process deployment backed by in-memory stores. A variable that is
//! present but unparsable is an error rather than a silent fallback.

use super::redis::RedisConnectionConfig;
use crate::constants::{keys, rate_limits, service_names, sessions};
use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Default HTTP listen port
const DEFAULT_HTTP_PORT: u16 = 8080;

/// Top-level server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen port
    pub http_port: u16,
    /// Redis URL; absent selects in-memory backends
    pub redis_url: Option<String>,
    /// Redis connection tuning
    pub redis_connection: RedisConnectionConfig,
    /// Key-distribution topic settings
    pub broker: BrokerConfig,
    /// Issuer-side signing key settings
    pub key_issuer: KeyIssuerConfig,
    /// Token lifetime and verifier registry settings
    pub token: TokenConfig,
    /// Sliding-window limiter settings
    pub rate_limit: RateLimitSettings,
    /// Session store settings
    pub session: SessionSettings,
}

/// Key-distribution topic configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Topic carrying key-update messages
    pub topic: String,
    /// Pause before resubscribing after a consume failure
    pub consumer_backoff_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            topic: keys::DEFAULT_KEY_UPDATE_TOPIC.to_owned(),
            consumer_backoff_secs: keys::DEFAULT_CONSUMER_BACKOFF_SECS,
        }
    }
}

impl BrokerConfig {
    /// Consumer backoff as a `Duration`
    #[must_use]
    pub const fn consumer_backoff(&self) -> Duration {
        Duration::from_secs(self.consumer_backoff_secs)
    }
}

/// Issuer signing key configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyIssuerConfig {
    /// Name carried in every published key-update message
    pub service_name: String,
    /// Directory holding the private key, public key and version metadata
    pub key_dir: PathBuf,
    /// Requested RSA modulus size; values below 2048 are upgraded
    pub rsa_key_bits: usize,
    /// Rotation period
    pub rotation_interval_hours: u64,
    /// Whether the rotation scheduler runs at all
    pub rotation_enabled: bool,
}

impl Default for KeyIssuerConfig {
    fn default() -> Self {
        Self {
            service_name: service_names::KEY_ISSUER.to_owned(),
            key_dir: PathBuf::from("./keys"),
            rsa_key_bits: keys::MIN_RSA_KEY_BITS,
            rotation_interval_hours: keys::DEFAULT_ROTATION_INTERVAL_HOURS,
            rotation_enabled: true,
        }
    }
}

impl KeyIssuerConfig {
    /// Rotation period as a `Duration`
    #[must_use]
    pub const fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.rotation_interval_hours * 3600)
    }
}

/// Token lifetime and verifier-side key settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Lifetime of a signed token and of its session
    pub ttl_hours: i64,
    /// PEM file seeding the verifier registry when the gateway runs alone
    pub bootstrap_public_key_path: Option<PathBuf>,
    /// Drop registry entries superseded longer ago than the token lifetime
    pub key_retention_enabled: bool,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            ttl_hours: sessions::DEFAULT_TOKEN_TTL_HOURS,
            bootstrap_public_key_path: None,
            key_retention_enabled: false,
        }
    }
}

impl TokenConfig {
    /// Token lifetime as a `chrono::Duration`
    #[must_use]
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.ttl_hours)
    }
}

/// Rate limiter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Requests per window for the general API limiter
    pub api_limit: u32,
    /// Requests per window for sensitive endpoints
    pub strict_limit: u32,
    /// Sliding window length
    pub window_secs: u64,
    /// Upper bound for a single store round trip
    pub store_timeout_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            api_limit: rate_limits::DEFAULT_API_LIMIT,
            strict_limit: rate_limits::DEFAULT_STRICT_LIMIT,
            window_secs: rate_limits::DEFAULT_WINDOW_SECS,
            store_timeout_ms: rate_limits::DEFAULT_STORE_TIMEOUT_MS,
        }
    }
}

impl RateLimitSettings {
    /// Store round-trip bound as a `Duration`
    #[must_use]
    pub const fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Window as a `Duration`
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Session store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Upper bound for a session lookup on the request path
    pub store_timeout_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            store_timeout_ms: sessions::DEFAULT_SESSION_STORE_TIMEOUT_MS,
        }
    }
}

impl SessionSettings {
    /// Lookup timeout as a `Duration`
    #[must_use]
    pub const fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            redis_url: None,
            redis_connection: RedisConnectionConfig::default(),
            broker: BrokerConfig::default(),
            key_issuer: KeyIssuerConfig::default(),
            token: TokenConfig::default(),
            rate_limit: RateLimitSettings::default(),
            session: SessionSettings::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` when a variable cannot be parsed or a value is out of range
    pub fn from_env() -> AppResult<Self> {
        info!("Loading configuration from environment variables");

        let config = Self {
            http_port: parse_env("HTTP_PORT", DEFAULT_HTTP_PORT)?,
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.trim().is_empty()),
            redis_connection: RedisConnectionConfig::from_env()?,
            broker: BrokerConfig {
                topic: env_var_or("KEY_UPDATE_TOPIC", keys::DEFAULT_KEY_UPDATE_TOPIC),
                consumer_backoff_secs: parse_env(
                    "KEY_CONSUMER_BACKOFF_SECS",
                    keys::DEFAULT_CONSUMER_BACKOFF_SECS,
                )?,
            },
            key_issuer: KeyIssuerConfig {
                service_name: env_var_or("SERVICE_NAME", service_names::KEY_ISSUER),
                key_dir: PathBuf::from(env_var_or("KEY_DIR", "./keys")),
                rsa_key_bits: parse_env("RSA_KEY_BITS", keys::MIN_RSA_KEY_BITS)?,
                rotation_interval_hours: parse_env(
                    "KEY_ROTATION_INTERVAL_HOURS",
                    keys::DEFAULT_ROTATION_INTERVAL_HOURS,
                )?,
                rotation_enabled: parse_env("KEY_ROTATION_ENABLED", true)?,
            },
            token: TokenConfig {
                ttl_hours: parse_env("TOKEN_TTL_HOURS", sessions::DEFAULT_TOKEN_TTL_HOURS)?,
                bootstrap_public_key_path: env::var("BOOTSTRAP_PUBLIC_KEY_PATH")
                    .ok()
                    .filter(|path| !path.trim().is_empty())
                    .map(PathBuf::from),
                key_retention_enabled: parse_env("KEY_RETENTION_ENABLED", false)?,
            },
            rate_limit: RateLimitSettings {
                api_limit: parse_env("RATE_LIMIT_API", rate_limits::DEFAULT_API_LIMIT)?,
                strict_limit: parse_env("RATE_LIMIT_STRICT", rate_limits::DEFAULT_STRICT_LIMIT)?,
                window_secs: parse_env("RATE_LIMIT_WINDOW_SECS", rate_limits::DEFAULT_WINDOW_SECS)?,
                store_timeout_ms: parse_env(
                    "RATE_LIMIT_STORE_TIMEOUT_MS",
                    rate_limits::DEFAULT_STORE_TIMEOUT_MS,
                )?,
            },
            session: SessionSettings {
                store_timeout_ms: parse_env(
                    "SESSION_STORE_TIMEOUT_MS",
                    sessions::DEFAULT_SESSION_STORE_TIMEOUT_MS,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall timers or make every request fail
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` naming the offending variable
    pub fn validate(&self) -> AppResult<()> {
        if self.key_issuer.rotation_interval_hours == 0 {
            return Err(AppError::config_invalid(
                "KEY_ROTATION_INTERVAL_HOURS must be greater than zero",
            ));
        }
        if self.token.ttl_hours <= 0 {
            return Err(AppError::config_invalid(
                "TOKEN_TTL_HOURS must be greater than zero",
            ));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(AppError::config_invalid(
                "RATE_LIMIT_WINDOW_SECS must be greater than zero",
            ));
        }
        if self.rate_limit.api_limit == 0 || self.rate_limit.strict_limit == 0 {
            return Err(AppError::config_invalid(
                "RATE_LIMIT_API and RATE_LIMIT_STRICT must be greater than zero",
            ));
        }
        if self.broker.topic.trim().is_empty() {
            return Err(AppError::config_invalid("KEY_UPDATE_TOPIC must not be empty"));
        }
        Ok(())
    }

    /// Log-safe one-line description (no URLs with credentials, no key material)
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "TaskHub auth configuration: port={} backend={} topic={} service={} key_bits={} \
             rotation={} every {}h token_ttl={}h rate_limit={}/{}s (strict {}) retention={}",
            self.http_port,
            if self.redis_url.is_some() {
                "redis"
            } else {
                "in-memory"
            },
            self.broker.topic,
            self.key_issuer.service_name,
            self.key_issuer.rsa_key_bits,
            if self.key_issuer.rotation_enabled {
                "enabled"
            } else {
                "disabled"
            },
            self.key_issuer.rotation_interval_hours,
            self.token.ttl_hours,
            self.rate_limit.api_limit,
            self.rate_limit.window_secs,
            self.rate_limit.strict_limit,
            self.token.key_retention_enabled,
        )
    }
}

/// Get environment variable or default value
fn env_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// Parse an environment variable, falling back to `default` only when it is unset
pub(crate) fn parse_env<T>(key: &str, default: T) -> AppResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::config_invalid(format!("Invalid {key} value '{raw}': {e}"))),
        Err(_) => Ok(default),
    }
}
