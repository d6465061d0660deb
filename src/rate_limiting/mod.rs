// ABOUTME: Sliding-window rate limiter over time-scored sets in the shared store
// ABOUTME: Per-identity and per-endpoint policies, bounded store calls and fail-open on store failure
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

//! # Sliding-Window Rate Limiting
//!
//! Each `(identity, scope)` owns a scored set of request timestamps. A check
//! prunes entries older than the window and counts what is left (one atomic
//! round trip), then records the current request if it is under the limit
//! (a second round trip). Two concurrent checks may both pass the count
//! before either records, so a burst can exceed the limit by the number of
//! in-flight requests.
//!
//! The limiter protects capacity, not security: if the store is
//! unavailable, slow or not configured, requests are allowed.

/// Window store selection
pub mod factory;
/// In-memory window store
pub mod memory;
/// Redis sorted-set window store
pub mod redis;

pub use factory::create_window_store;
pub use memory::InMemoryWindowStore;
pub use self::redis::RedisWindowStore;

use crate::config::RateLimitSettings;
use crate::constants::rate_limits::{API_KEY_PREFIX, KEY_TTL_GRACE_SECS, STRICT_KEY_PREFIX};
use crate::errors::{AppError, AppResult};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Limit, window and key namespace of one limiter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Requests allowed per window
    pub limit: u32,
    /// Window length
    pub window: Duration,
    /// Key prefix; the identity is appended
    pub key_prefix: String,
}

impl RateLimitPolicy {
    /// Custom policy
    #[must_use]
    pub fn new(limit: u32, window: Duration, key_prefix: impl Into<String>) -> Self {
        Self {
            limit,
            window,
            key_prefix: key_prefix.into(),
        }
    }

    /// General API policy
    #[must_use]
    pub fn api(settings: &RateLimitSettings) -> Self {
        Self::new(settings.api_limit, settings.window(), API_KEY_PREFIX)
    }

    /// Lower limit for sensitive endpoints
    #[must_use]
    pub fn strict(settings: &RateLimitSettings) -> Self {
        Self::new(settings.strict_limit, settings.window(), STRICT_KEY_PREFIX)
    }

    /// Same limits, counted separately for one endpoint
    #[must_use]
    pub fn for_endpoint(&self, endpoint: &str) -> Self {
        Self {
            key_prefix: format!("{}{endpoint}:", self.key_prefix),
            ..self.clone()
        }
    }

    /// Store key for an identity
    #[must_use]
    pub fn key(&self, identity: &str) -> String {
        format!("{}{identity}", self.key_prefix)
    }
}

/// Result of a checked request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Configured limit
    pub limit: u32,
    /// Requests left in the current window after this one
    pub remaining: u32,
    /// Unix timestamp at which the window resets
    pub reset_at: i64,
    /// Seconds a rejected caller should wait; always at least 1
    pub retry_after_secs: u64,
}

/// Storage for time-scored sets
#[async_trait::async_trait]
pub trait WindowStore: Send + Sync {
    /// Remove members scored at or before `window_start_nanos` and count the rest
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` if the store cannot be reached
    async fn prune_and_count(&self, key: &str, window_start_nanos: i64) -> AppResult<u64>;

    /// Add `member` scored `score_nanos` and reset the key TTL
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` if the store cannot be reached
    async fn record(
        &self,
        key: &str,
        member: &str,
        score_nanos: i64,
        ttl: Duration,
    ) -> AppResult<()>;

    /// Backend name for logs
    fn backend_name(&self) -> &'static str;
}

/// Sliding-window limiter for one policy
#[derive(Clone)]
pub struct SlidingWindowRateLimiter {
    store: Option<Arc<dyn WindowStore>>,
    policy: RateLimitPolicy,
    timeout: Duration,
}

impl SlidingWindowRateLimiter {
    /// Create a limiter; `store = None` leaves it uninitialized and every request is allowed
    #[must_use]
    pub fn new(
        store: Option<Arc<dyn WindowStore>>,
        policy: RateLimitPolicy,
        timeout: Duration,
    ) -> Self {
        if store.is_none() {
            warn!(
                prefix = %policy.key_prefix,
                "Rate limiter has no store, all requests will be allowed"
            );
        }
        Self {
            store,
            policy,
            timeout,
        }
    }

    /// Same store and timeout with another policy
    #[must_use]
    pub fn with_policy(&self, policy: RateLimitPolicy) -> Self {
        Self {
            store: self.store.clone(),
            policy,
            timeout: self.timeout,
        }
    }

    /// Active policy
    #[must_use]
    pub const fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Check and record a request for `identity`
    ///
    /// Returns `None` when the store is missing, failing or too slow; the
    /// caller should then let the request through without rate-limit headers.
    pub async fn check_and_record(&self, identity: &str) -> Option<RateLimitDecision> {
        let store = self.store.as_ref()?;

        match tokio::time::timeout(self.timeout, self.check_with(store.as_ref(), identity)).await {
            Ok(Ok(decision)) => Some(decision),
            Ok(Err(e)) => {
                warn!(
                    identity,
                    backend = store.backend_name(),
                    "Rate limit check failed, allowing request: {}",
                    e
                );
                None
            }
            Err(_) => {
                warn!(
                    identity,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Rate limit check timed out, allowing request"
                );
                None
            }
        }
    }

    async fn check_with(
        &self,
        store: &dyn WindowStore,
        identity: &str,
    ) -> AppResult<RateLimitDecision> {
        let now = Utc::now();
        let now_nanos = now
            .timestamp_nanos_opt()
            .ok_or_else(|| AppError::internal("Current time out of nanosecond range"))?;
        let window_nanos = i64::try_from(self.policy.window.as_nanos())
            .map_err(|_| AppError::internal("Rate limit window too large"))?;
        let window_secs = self.policy.window.as_secs() as i64;

        let key = self.policy.key(identity);
        let count = store.prune_and_count(&key, now_nanos - window_nanos).await?;

        let limit = u64::from(self.policy.limit);
        let reset_at = now.timestamp() + window_secs;
        let retry_after_secs = (reset_at - now.timestamp()).max(1) as u64;

        if count >= limit {
            debug!(identity, count, limit, "Rate limit exceeded");
            return Ok(RateLimitDecision {
                allowed: false,
                limit: self.policy.limit,
                remaining: 0,
                reset_at,
                retry_after_secs,
            });
        }

        let member = format!("{now_nanos}:{}", &Uuid::new_v4().simple().to_string()[..8]);
        let ttl = self.policy.window + Duration::from_secs(KEY_TTL_GRACE_SECS);
        store.record(&key, &member, now_nanos, ttl).await?;

        Ok(RateLimitDecision {
            allowed: true,
            limit: self.policy.limit,
            remaining: limit.saturating_sub(count + 1) as u32,
            reset_at,
            retry_after_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let settings = RateLimitSettings::default();
        let api = RateLimitPolicy::api(&settings);
        assert_eq!(api.key("u1"), "ratelimit:user:u1");

        let strict = RateLimitPolicy::strict(&settings);
        assert_eq!(strict.limit, 20);
        assert_eq!(strict.key("u1"), "ratelimit:user:strict:u1");

        let scoped = api.for_endpoint("/auth/logout-all");
        assert_eq!(scoped.key("u1"), "ratelimit:user:/auth/logout-all:u1");
        assert_eq!(scoped.limit, api.limit);
    }

    #[tokio::test]
    async fn test_uninitialized_limiter_fails_open() {
        let limiter = SlidingWindowRateLimiter::new(
            None,
            RateLimitPolicy::new(1, Duration::from_secs(60), "t:"),
            Duration::from_millis(100),
        );
        assert!(limiter.check_and_record("u1").await.is_none());
        assert!(limiter.check_and_record("u1").await.is_none());
    }
}
