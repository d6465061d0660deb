// ABOUTME: Window store selection for the rate limiter based on REDIS_URL
// ABOUTME: An unreachable Redis leaves the limiter uninitialized instead of failing startup
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

use super::{InMemoryWindowStore, RedisWindowStore, WindowStore};
use crate::config::RedisConnectionConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Create the window store for this deployment
///
/// Returns `None` when Redis is configured but unreachable; limiters built
/// on it allow every request.
pub async fn create_window_store(
    redis_url: Option<&str>,
    conn_config: &RedisConnectionConfig,
    window: Duration,
) -> Option<Arc<dyn WindowStore>> {
    let Some(url) = redis_url else {
        info!("REDIS_URL not set, rate limit windows are local to this process");
        return Some(Arc::new(InMemoryWindowStore::with_cleanup(window)));
    };

    match RedisWindowStore::connect(url, conn_config).await {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            warn!("Rate limit store unavailable, limiter disabled: {}", e);
            None
        }
    }
}
