// ABOUTME: Redis pub/sub key-distribution broker with a capped replay list per topic
// ABOUTME: Publishes atomically to the channel and the history list, subscribes via dedicated pub/sub connections
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

use super::{KeyBroker, PayloadStream, RETAINED_MESSAGES};
use crate::config::RedisConnectionConfig;
use crate::errors::{AppError, AppResult};
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use tracing::{error, info};

/// Redis-backed broker
///
/// Publishing pushes the payload onto `{topic}:history` (capped) and
/// publishes it on channel `{topic}` inside one `MULTI` block. Each
/// subscription opens its own pub/sub connection.
#[derive(Clone)]
pub struct RedisKeyBroker {
    client: redis::Client,
    manager: ConnectionManager,
}

impl RedisKeyBroker {
    /// Connect to Redis
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or Redis stays unreachable
    /// after the configured retries
    pub async fn connect(redis_url: &str, conn_config: &RedisConnectionConfig) -> AppResult<Self> {
        let client = redis::Client::open(redis_url).map_err(|e| {
            AppError::config_invalid(format!("Invalid REDIS_URL: {e}")).with_source(e)
        })?;
        let manager = conn_config.connect(redis_url).await?;

        info!("Key broker connected to Redis");
        Ok(Self { client, manager })
    }

    fn history_key(topic: &str) -> String {
        format!("{topic}:history")
    }
}

#[async_trait::async_trait]
impl KeyBroker for RedisKeyBroker {
    async fn publish(&self, topic: &str, payload: &[u8]) -> AppResult<()> {
        let history_key = Self::history_key(topic);
        let mut conn = self.manager.clone();

        let (receivers,): (i64,) = redis::pipe()
            .atomic()
            .rpush(&history_key, payload)
            .ignore()
            .ltrim(&history_key, -(RETAINED_MESSAGES as isize), -1)
            .ignore()
            .publish(topic, payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                error!(topic, "Redis PUBLISH failed: {}", e);
                AppError::broker_unavailable(format!("Failed to publish key update: {e}"))
            })?;

        info!(topic, receivers, "Published key update");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> AppResult<PayloadStream> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(|e| {
            error!(topic, "Redis pub/sub connection failed: {}", e);
            AppError::broker_unavailable(format!("Failed to open subscription: {e}"))
        })?;

        pubsub.subscribe(topic).await.map_err(|e| {
            error!(topic, "Redis SUBSCRIBE failed: {}", e);
            AppError::broker_unavailable(format!("Failed to subscribe to {topic}: {e}"))
        })?;

        let stream = pubsub
            .into_on_message()
            .map(|message| Ok(message.get_payload_bytes().to_vec()));

        Ok(stream.boxed())
    }

    async fn retained(&self, topic: &str) -> AppResult<Vec<Vec<u8>>> {
        let mut conn = self.manager.clone();

        redis::cmd("LRANGE")
            .arg(Self::history_key(topic))
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                error!(topic, "Redis LRANGE failed: {}", e);
                AppError::broker_unavailable(format!("Failed to read key history: {e}"))
            })
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
