// ABOUTME: Session store factory selecting the Redis or in-memory backend from configuration
// ABOUTME: Mirrors the broker factory so both follow the same REDIS_URL switch
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

use super::{InMemorySessionStore, RedisSessionStore, SessionStore};
use crate::config::RedisConnectionConfig;
use crate::constants::sessions::SESSION_SWEEP_INTERVAL_SECS;
use crate::errors::AppResult;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Create the session store for this deployment
///
/// # Errors
///
/// Returns an error if Redis is configured but unreachable
pub async fn create_session_store(
    redis_url: Option<&str>,
    conn_config: &RedisConnectionConfig,
) -> AppResult<Arc<dyn SessionStore>> {
    if let Some(url) = redis_url {
        info!("Initializing Redis session store");
        return Ok(Arc::new(RedisSessionStore::connect(url, conn_config).await?));
    }

    warn!("REDIS_URL not set, sessions are local to this process");
    Ok(Arc::new(InMemorySessionStore::with_cleanup(
        Duration::from_secs(SESSION_SWEEP_INTERVAL_SECS),
    )))
}
