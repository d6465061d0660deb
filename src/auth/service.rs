// ABOUTME: Login and logout flows tying credentials, token issuance and the session store together
// ABOUTME: Credentials are checked through a pluggable provider with bcrypt password hashes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

use super::{IssuedToken, TokenIssuer};
use crate::errors::{AppError, AppResult};
use crate::logging::token_fingerprint;
use crate::models::UserRecord;
use crate::session::SessionStore;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Source of user credentials
#[async_trait::async_trait]
pub trait CredentialsProvider: Send + Sync {
    /// Look up a user by login email
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be queried
    async fn find_by_email(&self, email: &str) -> AppResult<Option<UserRecord>>;
}

/// Credentials held in process memory, keyed by lowercased email
#[derive(Clone, Default)]
pub struct InMemoryCredentialsProvider {
    users: Arc<DashMap<String, UserRecord>>,
    bcrypt_cost: Option<u32>,
}

impl InMemoryCredentialsProvider {
    /// Empty provider hashing with the bcrypt default cost
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty provider hashing with `cost`; low costs keep tests fast
    #[must_use]
    pub fn with_cost(cost: u32) -> Self {
        Self {
            users: Arc::new(DashMap::new()),
            bcrypt_cost: Some(cost),
        }
    }

    /// Register a user, hashing `password`
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the email is empty or hashing fails
    pub fn add_user(
        &self,
        email: &str,
        password: &str,
        permissions: Vec<String>,
    ) -> AppResult<UserRecord> {
        if email.trim().is_empty() {
            return Err(AppError::invalid_input("Email must not be empty"));
        }
        let cost = self.bcrypt_cost.unwrap_or(bcrypt::DEFAULT_COST);
        let password_hash = bcrypt::hash(password, cost)
            .map_err(|e| AppError::invalid_input(format!("Failed to hash password: {e}")))?;

        let record = UserRecord {
            user_id: Uuid::new_v4(),
            email: email.to_owned(),
            password_hash,
            permissions,
        };
        self.users.insert(email.to_lowercase(), record.clone());
        Ok(record)
    }
}

#[async_trait::async_trait]
impl CredentialsProvider for InMemoryCredentialsProvider {
    async fn find_by_email(&self, email: &str) -> AppResult<Option<UserRecord>> {
        Ok(self
            .users
            .get(&email.to_lowercase())
            .map(|entry| entry.value().clone()))
    }
}

/// Successful login response
#[derive(Debug, Clone, Serialize)]
pub struct LoginResult {
    /// Bearer token
    pub token: String,
    /// Token expiry
    pub expires_at: DateTime<Utc>,
    /// Version of the signing key
    pub key_version: u64,
    /// Authenticated user
    pub user_id: Uuid,
    /// Granted permissions
    pub permissions: Vec<String>,
}

/// Issuer-side authentication flows
#[derive(Clone)]
pub struct AuthService {
    credentials: Arc<dyn CredentialsProvider>,
    issuer: TokenIssuer,
    sessions: Arc<dyn SessionStore>,
}

impl AuthService {
    /// Create the service
    #[must_use]
    pub fn new(
        credentials: Arc<dyn CredentialsProvider>,
        issuer: TokenIssuer,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            credentials,
            issuer,
            sessions,
        }
    }

    /// Check credentials, sign a token and record its session
    ///
    /// # Errors
    ///
    /// - `Unauthenticated` for an unknown email or wrong password, without
    ///   saying which
    /// - `StoreUnavailable` if the session cannot be recorded; no token is
    ///   returned in that case
    pub async fn login(&self, email: &str, password: &str) -> AppResult<LoginResult> {
        let Some(user) = self.credentials.find_by_email(email).await? else {
            warn!("Login failed: unknown email");
            return Err(AppError::unauthenticated("Invalid email or password"));
        };

        let candidate = password.to_owned();
        let hash = user.password_hash.clone();
        let matches = tokio::task::spawn_blocking(move || bcrypt::verify(candidate, &hash))
            .await
            .map_err(|e| AppError::internal(format!("Password check task failed: {e}")))?
            .unwrap_or(false);

        if !matches {
            warn!(user_id = %user.user_id, "Login failed: wrong password");
            return Err(AppError::unauthenticated("Invalid email or password"));
        }

        let IssuedToken {
            token,
            expires_at,
            key_version,
        } = self
            .issuer
            .issue(user.user_id, user.permissions.clone())
            .await?;

        self.sessions
            .create_session(user.user_id, &token, expires_at)
            .await?;

        info!(
            user_id = %user.user_id,
            key_version,
            token = %token_fingerprint(&token),
            "User logged in"
        );

        Ok(LoginResult {
            token,
            expires_at,
            key_version,
            user_id: user.user_id,
            permissions: user.permissions,
        })
    }

    /// Revoke the session of one token
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store cannot be reached
    pub async fn logout(&self, user_id: Uuid, token: &str) -> AppResult<bool> {
        let revoked = self.sessions.revoke_session(user_id, token).await?;
        info!(%user_id, revoked, token = %token_fingerprint(token), "Session logout");
        Ok(revoked)
    }

    /// Revoke every session of a user
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store cannot be reached
    pub async fn logout_all(&self, user_id: Uuid) -> AppResult<u64> {
        let revoked = self.sessions.revoke_all_user_sessions(user_id).await?;
        info!(%user_id, revoked, "Revoked all user sessions");
        Ok(revoked)
    }
}
