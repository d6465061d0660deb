// ABOUTME: Redis sorted-set window store for the sliding-window rate limiter
// ABOUTME: Prune+count in one MULTI block, then ZADD+PEXPIRE for admitted requests
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

use super::WindowStore;
use crate::config::RedisConnectionConfig;
use crate::errors::{AppError, AppResult};
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{error, info};

/// Redis-backed window store
#[derive(Clone)]
pub struct RedisWindowStore {
    manager: ConnectionManager,
}

impl RedisWindowStore {
    /// Connect to Redis
    ///
    /// # Errors
    ///
    /// Returns an error if Redis stays unreachable after the configured retries
    pub async fn connect(redis_url: &str, conn_config: &RedisConnectionConfig) -> AppResult<Self> {
        let manager = conn_config.connect(redis_url).await?;
        info!("Rate limit store connected to Redis");
        Ok(Self { manager })
    }

    /// Wrap an existing connection
    #[must_use]
    pub const fn from_manager(manager: ConnectionManager) -> Self {
        Self { manager }
    }
}

#[async_trait::async_trait]
impl WindowStore for RedisWindowStore {
    async fn prune_and_count(&self, key: &str, window_start_nanos: i64) -> AppResult<u64> {
        let mut conn = self.manager.clone();

        let (count,): (u64,) = redis::pipe()
            .atomic()
            .zrembyscore(key, 0, window_start_nanos)
            .ignore()
            .zcard(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                error!("Redis ZREMRANGEBYSCORE/ZCARD failed: {}", e);
                AppError::store_unavailable(format!("Rate limit store error: {e}"))
            })?;

        Ok(count)
    }

    async fn record(
        &self,
        key: &str,
        member: &str,
        score_nanos: i64,
        ttl: Duration,
    ) -> AppResult<()> {
        let mut conn = self.manager.clone();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);

        redis::pipe()
            .zadd(key, member, score_nanos)
            .ignore()
            .pexpire(key, ttl_ms)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| {
                error!("Redis ZADD/PEXPIRE failed: {}", e);
                AppError::store_unavailable(format!("Rate limit store error: {e}"))
            })
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
