// ABOUTME: Session store abstraction recording live tokens per user with expiry and revocation
// ABOUTME: Pluggable Redis and in-memory backends sharing one key layout and record format
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

//! # Session Store
//!
//! A signed token is only honoured while a matching active session exists.
//! Sessions are keyed by `session:{user_id}:{sha256(token)}`, so raw tokens
//! are never stored. Unknown and revoked sessions look the same to callers.

/// Backend selection from configuration
pub mod factory;
/// In-memory backend
pub mod memory;
/// Redis backend
pub mod redis;

pub use factory::create_session_store;
pub use memory::InMemorySessionStore;
pub use self::redis::RedisSessionStore;

use crate::constants::sessions::SESSION_KEY_PREFIX;
use crate::errors::AppResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Token may be used
    Active,
    /// Logged out or killed
    Revoked,
    /// Past its expiry
    Expired,
}

/// Stored session record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Owner
    pub user_id: Uuid,
    /// Current status
    pub status: SessionStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Expiry, equal to the token's `exp`
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Whether the session still authorizes requests at `now`
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Active && self.expires_at > now
    }
}

/// Shared session store
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Record a session for `token` that lives until `expires_at`
    ///
    /// # Errors
    ///
    /// `InvalidInput` if `expires_at` is not in the future, `StoreUnavailable`
    /// if the store cannot be reached
    async fn create_session(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<()>;

    /// Whether an active, unexpired session exists for this token
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` if the store cannot be reached
    async fn is_session_valid(&self, user_id: Uuid, token: &str) -> AppResult<bool>;

    /// Mark the session revoked, keeping its remaining TTL; false if none existed
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` if the store cannot be reached
    async fn revoke_session(&self, user_id: Uuid, token: &str) -> AppResult<bool>;

    /// Revoke every session of a user; returns how many were revoked
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` if the store cannot be reached
    async fn revoke_all_user_sessions(&self, user_id: Uuid) -> AppResult<u64>;

    /// Stored record for this token, if any
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` if the store cannot be reached
    async fn get_session(&self, user_id: Uuid, token: &str) -> AppResult<Option<SessionRecord>>;

    /// Backend name for logs
    fn backend_name(&self) -> &'static str;
}

/// Storage key for a session
#[must_use]
pub fn session_key(user_id: Uuid, token: &str) -> String {
    format!("{SESSION_KEY_PREFIX}{user_id}:{}", token_hash(token))
}

/// Key pattern matching every session of a user
#[must_use]
pub fn user_session_pattern(user_id: Uuid) -> String {
    format!("{SESSION_KEY_PREFIX}{user_id}:*")
}

/// Hex SHA-256 of a token
#[must_use]
pub fn token_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// TTL for a session expiring at `expires_at`, `None` if already expired
#[must_use]
pub fn ttl_until(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
    (expires_at - now).to_std().ok().filter(|ttl| !ttl.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_hides_token() {
        let user = Uuid::new_v4();
        let key = session_key(user, "secret.token.value");
        assert!(key.starts_with(&format!("session:{user}:")));
        assert!(!key.contains("secret"));
        assert_eq!(key.len(), "session:".len() + 36 + 1 + 64);
    }

    #[test]
    fn test_record_serialization_uses_lowercase_status() {
        let record = SessionRecord {
            user_id: Uuid::new_v4(),
            status: SessionStatus::Revoked,
            created_at: Utc::now(),
            expires_at: Utc::now(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "revoked");
    }

    #[test]
    fn test_ttl_until_past_is_none() {
        let now = Utc::now();
        assert!(ttl_until(now - chrono::Duration::seconds(1), now).is_none());
        assert!(ttl_until(now, now).is_none());
        assert_eq!(
            ttl_until(now + chrono::Duration::seconds(30), now),
            Some(Duration::from_secs(30))
        );
    }
}
