// ABOUTME: In-memory session store for single-process deployments and tests
// ABOUTME: DashMap keyed like the Redis layout, lazy expiry on read plus an optional background sweep
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

use super::{session_key, ttl_until, SessionRecord, SessionStatus, SessionStore};
use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// In-memory session store; clones share state
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<DashMap<String, SessionRecord>>,
    shutdown_tx: Option<Arc<mpsc::Sender<()>>>,
}

impl InMemorySessionStore {
    /// Create an empty store; expired records are dropped only when read
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that also drops expired records every `interval`
    ///
    /// Revoked records stay until their expiry, like the Redis layout. The
    /// sweep ends on [`Self::shutdown`] or when the last clone is dropped.
    #[must_use]
    pub fn with_cleanup(interval: Duration) -> Self {
        let sessions: Arc<DashMap<String, SessionRecord>> = Arc::new(DashMap::new());
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let sweep_sessions = Arc::clone(&sessions);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = Self::remove_expired(&sweep_sessions, Utc::now());
                        if removed > 0 {
                            tracing::debug!("Swept {} expired sessions", removed);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("Session sweep received shutdown signal");
                        break;
                    }
                }
            }
        });

        Self {
            sessions,
            shutdown_tx: Some(Arc::new(shutdown_tx)),
        }
    }

    /// Number of stored sessions, including revoked ones not yet expired
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Stop the background sweep, if any
    pub fn shutdown(&self) {
        if let Some(tx) = &self.shutdown_tx {
            let _ = tx.try_send(());
        }
    }

    fn remove_expired(sessions: &DashMap<String, SessionRecord>, now: DateTime<Utc>) -> usize {
        let before = sessions.len();
        sessions.retain(|_, record| ttl_until(record.expires_at, now).is_some());
        before.saturating_sub(sessions.len())
    }

    /// Look up a record, dropping it if its TTL has run out
    fn live_record(&self, key: &str) -> Option<SessionRecord> {
        let record = self.sessions.get(key).map(|entry| entry.value().clone())?;
        if ttl_until(record.expires_at, Utc::now()).is_none() {
            self.sessions.remove(key);
            return None;
        }
        Some(record)
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let now = Utc::now();
        if ttl_until(expires_at, now).is_none() {
            return Err(AppError::invalid_input("Session expiry must be in the future"));
        }

        self.sessions.insert(
            session_key(user_id, token),
            SessionRecord {
                user_id,
                status: SessionStatus::Active,
                created_at: now,
                expires_at,
            },
        );
        Ok(())
    }

    async fn is_session_valid(&self, user_id: Uuid, token: &str) -> AppResult<bool> {
        Ok(self
            .live_record(&session_key(user_id, token))
            .is_some_and(|record| record.is_valid_at(Utc::now())))
    }

    async fn revoke_session(&self, user_id: Uuid, token: &str) -> AppResult<bool> {
        let key = session_key(user_id, token);
        if self.live_record(&key).is_none() {
            return Ok(false);
        }
        Ok(self.sessions.get_mut(&key).is_some_and(|mut entry| {
            let was_active = entry.status == SessionStatus::Active;
            entry.status = SessionStatus::Revoked;
            was_active
        }))
    }

    async fn revoke_all_user_sessions(&self, user_id: Uuid) -> AppResult<u64> {
        let now = Utc::now();
        let mut revoked = 0;

        // Expired records would already be gone from Redis
        self.sessions.retain(|_, record| {
            record.user_id != user_id || ttl_until(record.expires_at, now).is_some()
        });

        for mut entry in self.sessions.iter_mut() {
            if entry.user_id == user_id && entry.is_valid_at(now) {
                entry.status = SessionStatus::Revoked;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn get_session(&self, user_id: Uuid, token: &str) -> AppResult<Option<SessionRecord>> {
        Ok(self.live_record(&session_key(user_id, token)))
    }

    fn backend_name(&self) -> &'static str {
        "in-memory"
    }
}
