// ABOUTME: Redis session store storing JSON session records with TTL matching token expiry
// ABOUTME: Revocation rewrites the record with SET XX KEEPTTL; revoke-all walks the user's keys with SCAN
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

use super::{
    session_key, ttl_until, user_session_pattern, SessionRecord, SessionStatus, SessionStore,
};
use crate::config::RedisConnectionConfig;
use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Keys fetched per SCAN round trip
const SCAN_BATCH: usize = 100;

/// Redis-backed session store
#[derive(Clone)]
pub struct RedisSessionStore {
    manager: ConnectionManager,
}

impl RedisSessionStore {
    /// Connect to Redis
    ///
    /// # Errors
    ///
    /// Returns an error if Redis stays unreachable after the configured retries
    pub async fn connect(redis_url: &str, conn_config: &RedisConnectionConfig) -> AppResult<Self> {
        let manager = conn_config.connect(redis_url).await?;
        info!("Session store connected to Redis");
        Ok(Self { manager })
    }

    /// Wrap an existing connection
    #[must_use]
    pub const fn from_manager(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    fn store_error(operation: &str, e: &redis::RedisError) -> AppError {
        error!("Redis {} operation failed: {}", operation, e);
        AppError::store_unavailable(format!("Session store error: {e}"))
    }

    async fn read(&self, key: &str) -> AppResult<Option<SessionRecord>> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| Self::store_error("GET", &e))?;

        raw.map(|json| {
            serde_json::from_str(&json).map_err(|e| {
                AppError::serialization(format!("Corrupt session record: {e}")).with_source(e)
            })
        })
        .transpose()
    }

    /// Rewrite a record without touching its TTL
    ///
    /// `XX` keeps a key that expired since it was read from coming back
    /// without a TTL. Returns false when there was nothing to overwrite.
    async fn write_keep_ttl(&self, key: &str, record: &SessionRecord) -> AppResult<bool> {
        let json = serde_json::to_string(record)?;
        let mut conn = self.manager.clone();

        let reply: redis::Value = redis::cmd("SET")
            .arg(key)
            .arg(json)
            .arg("XX")
            .arg("KEEPTTL")
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::store_error("SET XX KEEPTTL", &e))?;

        Ok(!matches!(reply, redis::Value::Nil))
    }

    async fn revoke_key(&self, key: &str) -> AppResult<bool> {
        match self.read(key).await? {
            Some(mut record) if record.status == SessionStatus::Active => {
                record.status = SessionStatus::Revoked;
                self.write_keep_ttl(key, &record).await
            }
            _ => Ok(false),
        }
    }
}

#[async_trait::async_trait]
impl SessionStore for RedisSessionStore {
    async fn create_session(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let now = Utc::now();
        let ttl = ttl_until(expires_at, now)
            .ok_or_else(|| AppError::invalid_input("Session expiry must be in the future"))?;

        let record = SessionRecord {
            user_id,
            status: SessionStatus::Active,
            created_at: now,
            expires_at,
        };
        let json = serde_json::to_string(&record)?;
        let mut conn = self.manager.clone();

        conn.set_ex::<_, _, ()>(session_key(user_id, token), json, ttl.as_secs().max(1))
            .await
            .map_err(|e| Self::store_error("SETEX", &e))?;

        debug!(user_id = %user_id, ttl_secs = ttl.as_secs(), "Session created");
        Ok(())
    }

    async fn is_session_valid(&self, user_id: Uuid, token: &str) -> AppResult<bool> {
        Ok(self
            .read(&session_key(user_id, token))
            .await?
            .is_some_and(|record| record.is_valid_at(Utc::now())))
    }

    async fn revoke_session(&self, user_id: Uuid, token: &str) -> AppResult<bool> {
        self.revoke_key(&session_key(user_id, token)).await
    }

    async fn revoke_all_user_sessions(&self, user_id: Uuid) -> AppResult<u64> {
        let pattern = user_session_pattern(user_id);
        let mut conn = self.manager.clone();
        let mut cursor = 0u64;
        let mut revoked = 0u64;

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| Self::store_error("SCAN", &e))?;

            for key in &keys {
                if self.revoke_key(key).await? {
                    revoked += 1;
                }
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        info!(user_id = %user_id, revoked, "Revoked all user sessions");
        Ok(revoked)
    }

    async fn get_session(&self, user_id: Uuid, token: &str) -> AppResult<Option<SessionRecord>> {
        self.read(&session_key(user_id, token)).await
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn store() -> Option<RedisSessionStore> {
        let url = std::env::var("REDIS_URL").ok()?;
        Some(
            RedisSessionStore::connect(&url, &RedisConnectionConfig::default())
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_rewrite_of_vanished_key_is_not_recreated() {
        let Some(store) = store().await else {
            return;
        };
        let user_id = Uuid::new_v4();
        let key = session_key(user_id, "vanished");
        let record = SessionRecord {
            user_id,
            status: SessionStatus::Revoked,
            created_at: Utc::now(),
            expires_at: Utc::now() + Duration::minutes(5),
        };

        assert!(!store.write_keep_ttl(&key, &record).await.unwrap());

        let mut conn = store.manager.clone();
        let exists: bool = conn.exists(&key).await.unwrap();
        assert!(!exists);
    }

    #[tokio::test]
    async fn test_rewrite_keeps_remaining_ttl() {
        let Some(store) = store().await else {
            return;
        };
        let user_id = Uuid::new_v4();
        store
            .create_session(user_id, "kept", Utc::now() + Duration::minutes(5))
            .await
            .unwrap();

        assert!(store.revoke_session(user_id, "kept").await.unwrap());

        let mut conn = store.manager.clone();
        let ttl: i64 = conn.ttl(session_key(user_id, "kept")).await.unwrap();
        assert!(ttl > 0 && ttl <= 300, "unexpected ttl {ttl}");
    }
}
