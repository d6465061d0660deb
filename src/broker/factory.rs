// ABOUTME: Broker factory selecting the Redis or in-process backend from configuration
// ABOUTME: Redis when a URL is configured, otherwise a process-local broadcast broker
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

use super::{InMemoryKeyBroker, KeyBroker, RedisKeyBroker};
use crate::config::RedisConnectionConfig;
use crate::errors::AppResult;
use std::sync::Arc;
use tracing::{info, warn};

/// Create the key broker for this deployment
///
/// # Errors
///
/// Returns an error if Redis is configured but unreachable
pub async fn create_key_broker(
    redis_url: Option<&str>,
    conn_config: &RedisConnectionConfig,
) -> AppResult<Arc<dyn KeyBroker>> {
    if let Some(url) = redis_url {
        info!("Initializing Redis key broker");
        return Ok(Arc::new(RedisKeyBroker::connect(url, conn_config).await?));
    }

    warn!("REDIS_URL not set, key updates only reach subscribers in this process");
    Ok(Arc::new(InMemoryKeyBroker::new()))
}
