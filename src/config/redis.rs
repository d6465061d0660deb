// ABOUTME: Redis connection configuration shared by the session, limiter and broker backends
// ABOUTME: Timeouts, reconnection behaviour and startup retry backoff loaded from environment
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

use super::environment::parse_env;
use crate::constants::redis;
use crate::errors::{AppError, AppResult};
use ::redis::aio::{ConnectionManager, ConnectionManagerConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Redis connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConnectionConfig {
    /// Connection timeout in seconds
    pub connection_timeout_secs: u64,
    /// Response/command timeout in seconds
    pub response_timeout_secs: u64,
    /// Number of reconnection retries after connection drop
    pub reconnection_retries: usize,
    /// Exponential backoff base for retry delays
    pub retry_exponent_base: u64,
    /// Maximum retry delay in milliseconds
    pub max_retry_delay_ms: u64,
    /// Number of retries for initial connection at startup
    pub initial_connection_retries: u32,
    /// Initial retry delay in milliseconds (doubles with exponential backoff)
    pub initial_retry_delay_ms: u64,
}

impl Default for RedisConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout_secs: redis::CONNECTION_TIMEOUT_SECS,
            response_timeout_secs: redis::RESPONSE_TIMEOUT_SECS,
            reconnection_retries: redis::RECONNECTION_RETRIES,
            retry_exponent_base: redis::RETRY_EXPONENT_BASE,
            max_retry_delay_ms: redis::MAX_RETRY_DELAY_MS,
            initial_connection_retries: redis::INITIAL_CONNECTION_RETRIES,
            initial_retry_delay_ms: redis::INITIAL_RETRY_DELAY_MS,
        }
    }
}

impl RedisConnectionConfig {
    /// Load Redis connection configuration from environment
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` if a variable is set but not a valid number
    pub fn from_env() -> AppResult<Self> {
        Ok(Self {
            connection_timeout_secs: parse_env(
                "REDIS_CONNECTION_TIMEOUT_SECS",
                redis::CONNECTION_TIMEOUT_SECS,
            )?,
            response_timeout_secs: parse_env(
                "REDIS_RESPONSE_TIMEOUT_SECS",
                redis::RESPONSE_TIMEOUT_SECS,
            )?,
            reconnection_retries: parse_env(
                "REDIS_RECONNECTION_RETRIES",
                redis::RECONNECTION_RETRIES,
            )?,
            retry_exponent_base: parse_env(
                "REDIS_RETRY_EXPONENT_BASE",
                redis::RETRY_EXPONENT_BASE,
            )?,
            max_retry_delay_ms: parse_env("REDIS_MAX_RETRY_DELAY_MS", redis::MAX_RETRY_DELAY_MS)?,
            initial_connection_retries: parse_env(
                "REDIS_INITIAL_CONNECTION_RETRIES",
                redis::INITIAL_CONNECTION_RETRIES,
            )?,
            initial_retry_delay_ms: parse_env(
                "REDIS_INITIAL_RETRY_DELAY_MS",
                redis::INITIAL_RETRY_DELAY_MS,
            )?,
        })
    }

    /// Open a managed connection, retrying the first connect with exponential backoff
    ///
    /// The returned `ConnectionManager` reconnects on its own afterwards, so
    /// every backend clones it per command instead of pooling.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` when every attempt fails, `ConfigInvalid`
    /// when the URL cannot be parsed
    pub async fn connect(&self, redis_url: &str) -> AppResult<ConnectionManager> {
        info!(
            "Connecting to Redis (timeout={}s, response_timeout={}s, retries={})",
            self.connection_timeout_secs, self.response_timeout_secs, self.initial_connection_retries
        );

        let client = ::redis::Client::open(redis_url).map_err(|e| {
            AppError::config_invalid(format!("Invalid REDIS_URL: {e}")).with_source(e)
        })?;

        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(Duration::from_secs(self.connection_timeout_secs))
            .set_response_timeout(Duration::from_secs(self.response_timeout_secs))
            .set_number_of_retries(self.reconnection_retries)
            .set_exponent_base(self.retry_exponent_base)
            .set_max_delay(self.max_retry_delay_ms);

        let max_retries = self.initial_connection_retries;
        let mut delay_ms = self.initial_retry_delay_ms;
        let mut last_error = None;

        for attempt in 0..=max_retries {
            match ConnectionManager::new_with_config(client.clone(), manager_config.clone()).await {
                Ok(manager) => {
                    if attempt > 0 {
                        info!("Redis connection established after {} retries", attempt);
                    }
                    return Ok(manager);
                }
                Err(e) => {
                    if attempt < max_retries {
                        warn!(
                            "Redis connection attempt {}/{} failed, retrying in {}ms: {}",
                            attempt + 1,
                            max_retries + 1,
                            delay_ms,
                            e
                        );
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        delay_ms = (delay_ms * 2).min(self.max_retry_delay_ms);
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(AppError::store_unavailable(format!(
            "Failed to connect to Redis after {} attempts: {}",
            max_retries + 1,
            last_error.map_or_else(|| "unknown error".to_owned(), |e| e.to_string())
        )))
    }
}
